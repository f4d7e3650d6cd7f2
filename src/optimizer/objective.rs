//! The uncertainty-aware objective model.
//!
//! Conversions follow the linear spend chain per channel:
//!
//! ```text
//! spend = budget × share
//! impressions = spend / cpm × 1000
//! clicks = impressions × ctr
//! conversions = clicks × cvr
//! ```
//!
//! Deterministic evaluation uses interval midpoints; Monte Carlo evaluation
//! draws cpm/ctr/cvr uniformly from their intervals per run and reports the
//! p10/p50/p90 order statistics of the resulting objective values.

use rand::Rng;

use crate::consts;
use crate::types::{
    Allocation, Assumptions, Channel, ChannelPriors, Direction, Goal, OutcomeBand,
};

/// One request's objective: budget, priors and goal bundled so every
/// optimizer evaluates allocations the same way.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Objective {
    pub budget: f64,
    pub priors: ChannelPriors,
    pub goal: Goal,
    avg_deal_size: f64,
}

impl Objective {
    pub(crate) fn new(budget: f64, priors: ChannelPriors, assumptions: &Assumptions) -> Self {
        Self {
            budget,
            priors,
            goal: assumptions.goal,
            avg_deal_size: assumptions.avg_deal_size.unwrap_or(1.0),
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        self.goal.direction()
    }

    /// Expected total conversions using interval midpoints. Pure: identical
    /// inputs always produce bit-identical output.
    pub(crate) fn conversions_mid(&self, allocation: &Allocation) -> f64 {
        let mut conversions = 0.0;
        for &ch in &Channel::ALL {
            let m = self.priors.get(ch);
            conversions += channel_conversions(
                self.budget * allocation.get(ch),
                m.cpm.mid(),
                m.ctr.mid(),
                m.cvr.mid(),
            );
        }
        conversions
    }

    /// One stochastic draw of total conversions, sampling every channel's
    /// cpm/ctr/cvr uniformly from its interval.
    pub(crate) fn conversions_sampled<R: Rng>(&self, allocation: &Allocation, rng: &mut R) -> f64 {
        let mut conversions = 0.0;
        for &ch in &Channel::ALL {
            let m = self.priors.get(ch);
            conversions += channel_conversions(
                self.budget * allocation.get(ch),
                m.cpm.sample(rng),
                m.ctr.sample(rng),
                m.cvr.sample(rng),
            );
        }
        conversions
    }

    /// Map a conversion count to the goal's objective value. Shared by the
    /// deterministic path and every Monte Carlo draw.
    pub(crate) fn value_from_conversions(&self, conversions: f64) -> f64 {
        match self.goal {
            Goal::Demos => conversions,
            Goal::Revenue => conversions * self.avg_deal_size,
            Goal::Cac => self.budget / conversions.max(consts::CAC_EPSILON),
        }
    }

    /// Deterministic objective value of an allocation.
    pub(crate) fn value(&self, allocation: &Allocation) -> f64 {
        self.value_from_conversions(self.conversions_mid(allocation))
    }

    /// Monte Carlo outcome band: `runs` stochastic draws, sorted ascending,
    /// percentiles taken by index `floor(q × (runs - 1))`.
    pub(crate) fn monte_carlo<R: Rng>(
        &self,
        allocation: &Allocation,
        runs: usize,
        rng: &mut R,
    ) -> OutcomeBand {
        let runs = runs.max(1);
        let mut outcomes: Vec<f64> = (0..runs)
            .map(|_| self.value_from_conversions(self.conversions_sampled(allocation, rng)))
            .collect();
        outcomes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        OutcomeBand {
            p10: outcomes[percentile_index(0.10, runs)],
            p50: outcomes[percentile_index(0.50, runs)],
            p90: outcomes[percentile_index(0.90, runs)],
        }
    }
}

fn channel_conversions(spend: f64, cpm: f64, ctr: f64, cvr: f64) -> f64 {
    if cpm <= 0.0 {
        return 0.0;
    }
    let impressions = spend / cpm * 1000.0;
    impressions * ctr * cvr
}

fn percentile_index(q: f64, runs: usize) -> usize {
    ((q * (runs - 1) as f64).floor() as usize).min(runs - 1)
}

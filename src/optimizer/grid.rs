//! Exhaustive grid search with Monte Carlo re-scoring — the primary
//! optimizer and the fallback when every validator fails.
//!
//! Enumerates all 286 allocations on the 4-simplex with 10% steps, discards
//! those violating constraints, scores each survivor with a Monte Carlo
//! outcome band, and ranks by median (p50). The top candidates also yield a
//! per-channel spread interval used as a rough confidence band.
//!
//! Zero surviving candidates is the detectable infeasible-constraints
//! condition and surfaces as a hard error.

use rand::Rng;
use tracing::debug;

use crate::consts;
use crate::errors::{OptimizeError, Result};
use crate::optimizer::config::TuningConfig;
use crate::optimizer::constraints::Constraints;
use crate::optimizer::objective::Objective;
use crate::types::{
    AlgorithmKind, AlgorithmResult, Allocation, Channel, Interval, OutcomeBand, PerChannel,
};

/// One scored grid point.
#[derive(Debug, Clone)]
pub(crate) struct GridCandidate {
    pub allocation: Allocation,
    pub conversions: f64,
    pub outcome: OutcomeBand,
}

/// Grid search output: the winner, the top-N runners-up and their spread.
#[derive(Debug, Clone)]
pub(crate) struct GridSearchOutput {
    pub best: GridCandidate,
    pub top: Vec<GridCandidate>,
    /// Per-channel [p10-ranked, p90-ranked] share interval across the top N.
    pub spread: PerChannel<Interval>,
    /// Grid points that survived constraint filtering.
    pub feasible: usize,
}

/// Run the full grid sweep.
pub(crate) fn optimize<R: Rng>(
    objective: &Objective,
    constraints: &Constraints,
    tuning: &TuningConfig,
    rng: &mut R,
) -> Result<GridSearchOutput> {
    let direction = objective.direction();
    let steps = consts::GRID_STEPS;
    let mut candidates: Vec<GridCandidate> = Vec::new();
    let mut enumerated = 0usize;

    for g in 0..=steps {
        for m in 0..=(steps - g) {
            for t in 0..=(steps - g - m) {
                let l = steps - g - m - t;
                enumerated += 1;
                let allocation = Allocation::from_shares(PerChannel {
                    google: f64::from(g) / f64::from(steps),
                    meta: f64::from(m) / f64::from(steps),
                    tiktok: f64::from(t) / f64::from(steps),
                    linkedin: f64::from(l) / f64::from(steps),
                });
                if !constraints.respects_default(&allocation) {
                    continue;
                }
                let conversions = objective.conversions_mid(&allocation);
                let outcome = objective.monte_carlo(&allocation, tuning.mc_runs, rng);
                candidates.push(GridCandidate {
                    allocation,
                    conversions,
                    outcome,
                });
            }
        }
    }

    debug!(
        enumerated,
        feasible = candidates.len(),
        "grid sweep complete"
    );

    if candidates.is_empty() {
        return Err(OptimizeError::InfeasibleConstraints(format!(
            "no grid candidate satisfies the stated constraints (floors sum to {:.2})",
            constraints.min_total()
        )));
    }

    let feasible = candidates.len();
    // Stable sort: on p50 ties the first-enumerated candidate wins.
    candidates.sort_by(|a, b| {
        if direction.better(a.outcome.p50, b.outcome.p50) {
            std::cmp::Ordering::Less
        } else if direction.better(b.outcome.p50, a.outcome.p50) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });

    let top_n = tuning.grid_top_n.max(1).min(candidates.len());
    let top: Vec<GridCandidate> = candidates[..top_n].to_vec();
    let spread = spread_band(&top);
    let best = top[0].clone();

    Ok(GridSearchOutput {
        best,
        top,
        spread,
        feasible,
    })
}

/// Per-channel share interval across the top candidates, taken as the
/// 10th/90th order statistics by index.
fn spread_band(top: &[GridCandidate]) -> PerChannel<Interval> {
    PerChannel::from_fn(|ch| {
        let mut values: Vec<f64> = top.iter().map(|c| c.allocation.get(ch)).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = values.len();
        let lo = ((0.10 * (n - 1) as f64).floor() as usize).min(n - 1);
        let hi = ((0.90 * (n - 1) as f64).floor() as usize).min(n - 1);
        Interval::new(values[lo], values[hi])
    })
}

/// Convert the grid output into the primary [`AlgorithmResult`].
///
/// Confidence starts from a base and shrinks with the average spread width
/// of the top candidates: a wide band means nearby grid points performed
/// comparably and the winner is less distinguished.
pub(crate) fn to_algorithm_result(
    output: &GridSearchOutput,
    objective: &Objective,
    tuning: &TuningConfig,
) -> AlgorithmResult {
    let mean_width: f64 = Channel::ALL
        .iter()
        .map(|&ch| output.spread.value(ch).width())
        .sum::<f64>()
        / Channel::ALL.len() as f64;
    let confidence =
        (tuning.grid_base_confidence - tuning.grid_spread_penalty * mean_width).clamp(0.5, 0.95);

    AlgorithmResult {
        algorithm: AlgorithmKind::GridMonteCarlo,
        allocation: output.best.allocation,
        confidence,
        performance: objective.value_from_conversions(output.best.conversions),
        detail: Some(serde_json::json!({
            "feasible_candidates": output.feasible,
            "outcome": output.best.outcome,
            "spread": output.spread,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Assumptions, ChannelMetrics, ChannelPriors, Goal, Interval, PartialShares,
    };
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn priors() -> ChannelPriors {
        PerChannel::from_fn(|ch| {
            // Meta is clearly the best channel.
            let ctr = if ch == Channel::Meta { 0.06 } else { 0.02 };
            ChannelMetrics {
                cpm: Interval::new(10.0, 20.0),
                ctr: Interval::new(ctr, ctr + 0.01),
                cvr: Interval::new(0.1, 0.3),
            }
        })
    }

    fn objective(goal: Goal) -> Objective {
        Objective::new(10_000.0, priors(), &Assumptions::new(goal))
    }

    #[test]
    fn unconstrained_sweep_visits_all_286_points() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 50; // keep the test quick
        let out = optimize(
            &objective(Goal::Demos),
            &Constraints::default(),
            &tuning,
            &mut rng,
        )
        .unwrap();
        assert_eq!(out.feasible, 286);
        assert!(out.best.allocation.sums_to_one());
    }

    #[test]
    fn best_candidate_favors_the_strong_channel() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 200;
        let out = optimize(
            &objective(Goal::Demos),
            &Constraints::default(),
            &tuning,
            &mut rng,
        )
        .unwrap();
        assert!(
            out.best.allocation.get(Channel::Meta) >= 0.5,
            "meta should dominate, got {:?}",
            out.best.allocation
        );
    }

    #[test]
    fn constraints_filter_the_grid() {
        let mut min = PartialShares::default();
        min.set(Channel::Linkedin, 0.2);
        let mut max = PartialShares::default();
        max.set(Channel::Tiktok, 0.2);
        let constraints = Constraints::new(min, max);
        let mut rng = SmallRng::seed_from_u64(4);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 50;
        let out = optimize(&objective(Goal::Demos), &constraints, &tuning, &mut rng).unwrap();
        assert!(out.feasible < 286);
        assert!(out.best.allocation.get(Channel::Linkedin) >= 0.2 - 1e-9);
        assert!(out.best.allocation.get(Channel::Tiktok) <= 0.2 + 1e-9);
    }

    #[test]
    fn infeasible_floors_error_out() {
        let mut min = PartialShares::default();
        min.set(Channel::Google, 0.5);
        min.set(Channel::Meta, 0.4);
        min.set(Channel::Tiktok, 0.3);
        min.set(Channel::Linkedin, 0.2);
        let constraints = Constraints::new(min, PartialShares::default());
        let mut rng = SmallRng::seed_from_u64(5);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 10;
        let err = optimize(&objective(Goal::Demos), &constraints, &tuning, &mut rng).unwrap_err();
        assert!(
            matches!(err, OptimizeError::InfeasibleConstraints(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn cac_goal_minimizes() {
        let mut rng = SmallRng::seed_from_u64(6);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 200;
        let out = optimize(
            &objective(Goal::Cac),
            &Constraints::default(),
            &tuning,
            &mut rng,
        )
        .unwrap();
        // Lowest CAC still means funding the high-conversion channel.
        assert!(
            out.best.allocation.get(Channel::Meta) >= 0.5,
            "meta should dominate for cac too, got {:?}",
            out.best.allocation
        );
        for pair in out.top.windows(2) {
            assert!(
                pair[0].outcome.p50 <= pair[1].outcome.p50 + 1e-9,
                "top list must be sorted ascending for cac"
            );
        }
    }

    #[test]
    fn primary_result_confidence_in_band() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut tuning = TuningConfig::default();
        tuning.mc_runs = 50;
        let obj = objective(Goal::Demos);
        let out = optimize(&obj, &Constraints::default(), &tuning, &mut rng).unwrap();
        let result = to_algorithm_result(&out, &obj, &tuning);
        assert!((0.5..=0.95).contains(&result.confidence));
        assert_eq!(result.algorithm, AlgorithmKind::GridMonteCarlo);
    }
}

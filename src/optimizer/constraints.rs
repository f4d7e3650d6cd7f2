//! Per-channel floor/ceiling constraints and simplex projection.
//!
//! Checking never mutates; projection clamps each channel into its bounds
//! and redistributes the surplus or deficit proportionally among channels
//! that still have slack, repeating until the allocation sums to 1 again.

use crate::consts;
use crate::types::{Allocation, Assumptions, Channel, PartialShares, PerChannel};

const MAX_PROJECTION_PASSES: usize = 32;
const MASS_TOLERANCE: f64 = 1e-9;

/// Immutable view of a request's min/max allocation constraints.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Constraints {
    min: PartialShares,
    max: PartialShares,
}

impl Constraints {
    pub(crate) fn new(min: PartialShares, max: PartialShares) -> Self {
        Self { min, max }
    }

    pub(crate) fn from_assumptions(assumptions: &Assumptions) -> Self {
        Self::new(assumptions.min_pct, assumptions.max_pct)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.min.is_empty() && self.max.is_empty()
    }

    /// Lower bound for a channel (0 when unconstrained).
    pub(crate) fn floor(&self, channel: Channel) -> f64 {
        self.min.get(channel).unwrap_or(0.0)
    }

    /// Upper bound for a channel (1 when unconstrained).
    pub(crate) fn ceiling(&self, channel: Channel) -> f64 {
        self.max.get(channel).unwrap_or(1.0)
    }

    /// Sum of all stated floors. Above 1 the constraint set is infeasible.
    pub(crate) fn min_total(&self) -> f64 {
        Channel::ALL.iter().map(|&ch| self.floor(ch)).sum()
    }

    /// True when `allocation` satisfies every stated floor and ceiling
    /// within `tolerance`.
    pub(crate) fn respects(&self, allocation: &Allocation, tolerance: f64) -> bool {
        Channel::ALL.iter().all(|&ch| {
            let share = allocation.get(ch);
            share >= self.floor(ch) - tolerance && share <= self.ceiling(ch) + tolerance
        })
    }

    pub(crate) fn respects_default(&self, allocation: &Allocation) -> bool {
        self.respects(allocation, consts::CONSTRAINT_TOLERANCE)
    }

    /// Project an allocation onto the constrained simplex: clamp each share
    /// into its bounds, then move the remaining mass imbalance onto channels
    /// with headroom (or slack), proportionally.
    ///
    /// With a feasible constraint set the result satisfies every bound and
    /// sums to 1. With an infeasible set the result is best-effort (bounds
    /// win over the sum invariant); callers that care must re-check with
    /// [`Constraints::respects`].
    pub(crate) fn project(&self, allocation: &Allocation) -> Allocation {
        let mut shares = allocation.normalized().shares().to_owned();

        for _ in 0..MAX_PROJECTION_PASSES {
            for &ch in &Channel::ALL {
                let clamped = shares.value(ch).clamp(self.floor(ch), self.ceiling(ch));
                *shares.get_mut(ch) = clamped;
            }
            let total: f64 = Channel::ALL.iter().map(|&ch| shares.value(ch)).sum();
            let imbalance = 1.0 - total;
            if imbalance.abs() <= MASS_TOLERANCE {
                break;
            }

            if imbalance > 0.0 {
                // Deficit: spread it over channels below their ceiling.
                let headroom = PerChannel::from_fn(|ch| self.ceiling(ch) - shares.value(ch));
                let open: f64 = Channel::ALL.iter().map(|&ch| headroom.value(ch).max(0.0)).sum();
                if open <= MASS_TOLERANCE {
                    break;
                }
                for &ch in &Channel::ALL {
                    let room = headroom.value(ch).max(0.0);
                    *shares.get_mut(ch) += imbalance * room / open;
                }
            } else {
                // Surplus: take it from channels above their floor.
                let slack = PerChannel::from_fn(|ch| shares.value(ch) - self.floor(ch));
                let open: f64 = Channel::ALL.iter().map(|&ch| slack.value(ch).max(0.0)).sum();
                if open <= MASS_TOLERANCE {
                    break;
                }
                for &ch in &Channel::ALL {
                    let give = slack.value(ch).max(0.0);
                    *shares.get_mut(ch) += imbalance * give / open;
                }
            }
        }

        Allocation::from_shares(shares)
    }
}

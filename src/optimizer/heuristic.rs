//! Closed-form heuristic optimizer.
//!
//! Allocates proportionally to each channel's midpoint efficiency
//! `ctr × cvr / cpm` (conversions per currency unit, up to the ×1000
//! impressions factor), then projects onto the constraint set. O(1) cost;
//! exists as a fast sanity-check baseline with fixed, lower trust.

use crate::optimizer::config::TuningConfig;
use crate::optimizer::constraints::Constraints;
use crate::optimizer::objective::Objective;
use crate::types::{AlgorithmKind, AlgorithmResult, Allocation, ChannelPriors, PerChannel};

/// Midpoint efficiency score per channel. Shared with the benchmark
/// deviation scoring, which compares allocations against the same pattern.
pub(crate) fn efficiency_scores(priors: &ChannelPriors) -> PerChannel<f64> {
    PerChannel::from_fn(|ch| {
        let m = priors.get(ch);
        let cpm = m.cpm.mid();
        if cpm <= 0.0 {
            return 0.0;
        }
        m.ctr.mid() * m.cvr.mid() / cpm
    })
}

/// Efficiency-proportional allocation, constraint-projected.
pub(crate) fn optimize(priors: &ChannelPriors, constraints: &Constraints) -> Allocation {
    let proportional = Allocation::from_weights(efficiency_scores(priors));
    constraints.project(&proportional)
}

pub(crate) fn to_algorithm_result(
    objective: &Objective,
    constraints: &Constraints,
    tuning: &TuningConfig,
) -> AlgorithmResult {
    let allocation = optimize(&objective.priors, constraints);
    AlgorithmResult {
        algorithm: AlgorithmKind::Heuristic,
        allocation,
        confidence: tuning.heuristic_confidence,
        performance: objective.value(&allocation),
        detail: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assumptions, Channel, ChannelMetrics, Goal, Interval, PartialShares};

    fn priors_with_strong_google() -> ChannelPriors {
        PerChannel::from_fn(|ch| {
            let ctr = if ch == Channel::Google { 0.08 } else { 0.02 };
            ChannelMetrics {
                cpm: Interval::new(10.0, 10.0),
                ctr: Interval::new(ctr, ctr),
                cvr: Interval::new(0.2, 0.2),
            }
        })
    }

    #[test]
    fn allocation_is_proportional_to_efficiency() {
        let priors = priors_with_strong_google();
        let alloc = optimize(&priors, &Constraints::default());
        // Google's score is 4x every other channel: 4/(4+1+1+1).
        assert!(
            (alloc.get(Channel::Google) - 4.0 / 7.0).abs() < 1e-9,
            "google share {}",
            alloc.get(Channel::Google)
        );
        assert!(alloc.sums_to_one());
    }

    #[test]
    fn projection_respects_ceilings() {
        let mut max = PartialShares::default();
        max.set(Channel::Google, 0.3);
        let constraints = Constraints::new(PartialShares::default(), max);
        let alloc = optimize(&priors_with_strong_google(), &constraints);
        assert!(alloc.get(Channel::Google) <= 0.3 + 1e-9);
        assert!(alloc.sums_to_one());
    }

    #[test]
    fn result_carries_fixed_confidence() {
        let priors = priors_with_strong_google();
        let objective = Objective::new(10_000.0, priors, &Assumptions::new(Goal::Demos));
        let tuning = TuningConfig::default();
        let result = to_algorithm_result(&objective, &Constraints::default(), &tuning);
        assert_eq!(result.confidence, tuning.heuristic_confidence);
        assert_eq!(result.algorithm, AlgorithmKind::Heuristic);
        assert!(result.performance > 0.0);
    }
}

//! Ensemble combiner: consensus, outlier handling and weighted merge.
//!
//! Pure in-process math over whatever [`AlgorithmResult`]s survived the
//! validation stage — no I/O, no timing. Each result's allocation is
//! weighted by confidence × a direction-aware performance factor; results
//! deviating from the cross-algorithm mean by more than a configurable
//! number of standard deviations on any channel are flagged as outliers
//! and down-weighted.

use tracing::debug;

use crate::optimizer::config::TuningConfig;
use crate::types::{
    AlgorithmResult, Allocation, Channel, ConsensusMetrics, Direction, PerChannel, Severity,
    Warning, WarningCode,
};

const WEIGHT_FLOOR: f64 = 1e-12;

/// Combined allocation plus the consensus diagnostics behind it.
#[derive(Debug, Clone)]
pub(crate) struct EnsembleOutcome {
    pub allocation: Allocation,
    pub consensus: ConsensusMetrics,
    /// Outlier flag per input result, same order as the input slice.
    pub outliers: Vec<bool>,
    pub warnings: Vec<Warning>,
}

/// Merge algorithm results into one allocation.
///
/// `results` must be non-empty; the caller guarantees at least the primary
/// grid result is present.
pub(crate) fn combine(
    results: &[AlgorithmResult],
    direction: Direction,
    tuning: &TuningConfig,
) -> EnsembleOutcome {
    assert!(!results.is_empty(), "ensemble requires at least one result");

    let mean = PerChannel::from_fn(|ch| {
        results.iter().map(|r| r.allocation.get(ch)).sum::<f64>() / results.len() as f64
    });
    let variance = PerChannel::from_fn(|ch| {
        results
            .iter()
            .map(|r| {
                let d = r.allocation.get(ch) - mean.value(ch);
                d * d
            })
            .sum::<f64>()
            / results.len() as f64
    });
    let mean_variance = Channel::ALL
        .iter()
        .map(|&ch| variance.value(ch))
        .sum::<f64>()
        / Channel::ALL.len() as f64;
    let agreement = 1.0 / (1.0 + tuning.agreement_variance_scale * mean_variance);

    let outliers = flag_outliers(results, tuning);
    let outlier_count = outliers.iter().filter(|&&o| o).count();

    let weights = weigh(results, &outliers, direction, tuning);
    let total: f64 = weights.iter().sum();

    let allocation = if total > WEIGHT_FLOOR {
        Allocation::from_weights(PerChannel::from_fn(|ch| {
            results
                .iter()
                .zip(&weights)
                .map(|(r, w)| w * r.allocation.get(ch))
                .sum()
        }))
    } else {
        // Everything was zero-weighted; fall back to the most trusted input.
        debug!("ensemble weights degenerate, falling back to highest-confidence result");
        results
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|r| r.allocation)
            .unwrap_or_else(Allocation::equal_split)
    };

    let warnings = allocation_warnings(&allocation, tuning);

    debug!(
        agreement,
        outlier_count,
        contributors = results.len(),
        "ensemble combined"
    );

    EnsembleOutcome {
        allocation,
        consensus: ConsensusMetrics {
            agreement: agreement.clamp(0.0, 1.0),
            variance,
            outlier_count,
        },
        outliers,
        warnings,
    }
}

/// Minimum std-dev scale for outlier detection, so near-unanimous peers
/// don't flag harmless deviations.
const MIN_OUTLIER_SCALE: f64 = 0.05;

/// A result is an outlier when any channel's share sits more than
/// `outlier_sigma` standard deviations from the mean of the *other*
/// results. Leave-one-out statistics matter here: with only a handful of
/// results, a gross outlier inflates the pooled std-dev enough to hide
/// itself.
fn flag_outliers(results: &[AlgorithmResult], tuning: &TuningConfig) -> Vec<bool> {
    if results.len() < 3 {
        // With two results every deviation is symmetric; flagging one
        // would arbitrarily discard half the ensemble.
        return vec![false; results.len()];
    }
    (0..results.len())
        .map(|i| {
            Channel::ALL.iter().any(|&ch| {
                let others: Vec<f64> = results
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, r)| r.allocation.get(ch))
                    .collect();
                let n = others.len() as f64;
                let mean = others.iter().sum::<f64>() / n;
                let var = others.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                let scale = var.sqrt().max(MIN_OUTLIER_SCALE);
                (results[i].allocation.get(ch) - mean).abs() > tuning.outlier_sigma * scale
            })
        })
        .collect()
}

/// Weight = confidence × performance factor, with outliers multiplied by
/// the configured outlier factor. The performance factor maps the
/// direction-aware best..worst range onto [floor, 1].
fn weigh(
    results: &[AlgorithmResult],
    outliers: &[bool],
    direction: Direction,
    tuning: &TuningConfig,
) -> Vec<f64> {
    let mut best = direction.worst();
    let mut worst = match direction {
        Direction::Maximize => f64::INFINITY,
        Direction::Minimize => f64::NEG_INFINITY,
    };
    for r in results {
        if direction.better(r.performance, best) {
            best = r.performance;
        }
        if direction.better(worst, r.performance) {
            worst = r.performance;
        }
    }
    let range = (best - worst).abs();

    results
        .iter()
        .zip(outliers)
        .map(|(r, &outlier)| {
            let norm = if range < WEIGHT_FLOOR {
                1.0
            } else {
                match direction {
                    Direction::Maximize => (r.performance - worst) / range,
                    Direction::Minimize => (worst - r.performance) / range,
                }
            };
            let factor = tuning.perf_weight_floor + (1.0 - tuning.perf_weight_floor) * norm;
            let mut weight = r.confidence.clamp(0.0, 1.0) * factor;
            if outlier {
                weight *= tuning.outlier_weight_factor;
            }
            weight
        })
        .collect()
}

/// Structural warnings about the combined allocation itself.
fn allocation_warnings(allocation: &Allocation, tuning: &TuningConfig) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let (channel, share) = allocation.max_share();
    if share > tuning.concentration_threshold {
        warnings.push(Warning::new(
            WarningCode::PortfolioConcentration,
            Severity::Medium,
            format!(
                "{} carries {:.0}% of the budget, above the {:.0}% concentration threshold",
                channel,
                share * 100.0,
                tuning.concentration_threshold * 100.0
            ),
        ));
    }
    let material = allocation.material_channels(tuning.diversification_floor);
    if material < tuning.min_material_channels {
        warnings.push(Warning::new(
            WarningCode::InsufficientDiversification,
            Severity::Low,
            format!(
                "only {} channel(s) receive at least {:.0}% of the budget",
                material,
                tuning.diversification_floor * 100.0
            ),
        ));
    }
    warnings
}

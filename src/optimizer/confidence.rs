//! Stability, benchmark deviation and composite confidence scoring.
//!
//! Confidence blends whatever signals are available for the request —
//! per-algorithm confidence, consensus agreement, cross-algorithm
//! stability, inverse benchmark deviation and (optionally) the external
//! semantic validator — with the blend weights renormalized over the terms
//! actually present. Disabled signals are omitted, never fabricated.

use crate::optimizer::config::TuningConfig;
use crate::optimizer::heuristic;
use crate::types::{
    AlgorithmResult, Allocation, BenchmarkComparison, Channel, ChannelPriors, ConsensusMetrics,
    PerChannel, Severity, Warning, WarningCode,
};

/// How tightly the algorithm allocations cluster around the combined
/// result: 1 − the scaled mean absolute deviation, clamped to [0, 1].
pub(crate) fn stability(
    results: &[AlgorithmResult],
    combined: &Allocation,
    tuning: &TuningConfig,
) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let total_dev: f64 = results
        .iter()
        .map(|r| {
            Channel::ALL
                .iter()
                .map(|&ch| (r.allocation.get(ch) - combined.get(ch)).abs())
                .sum::<f64>()
                / Channel::ALL.len() as f64
        })
        .sum();
    let mean_dev = total_dev / results.len() as f64;
    (1.0 - tuning.stability_scale * mean_dev).clamp(0.0, 1.0)
}

/// Compare the final allocation against the spend pattern implied by the
/// priors (midpoint efficiency, normalized). A channel with strong implied
/// efficiency but near-zero spend raises a high-severity flag.
pub(crate) fn benchmark_comparison(
    allocation: &Allocation,
    priors: &ChannelPriors,
    tuning: &TuningConfig,
) -> BenchmarkComparison {
    let expected = Allocation::from_weights(heuristic::efficiency_scores(priors));
    let per_channel =
        PerChannel::from_fn(|ch| (allocation.get(ch) - expected.get(ch)).abs().clamp(0.0, 1.0));
    let deviation_score = Channel::ALL
        .iter()
        .map(|&ch| per_channel.value(ch))
        .sum::<f64>()
        / Channel::ALL.len() as f64;

    let mut warnings = Vec::new();
    for &ch in &Channel::ALL {
        if expected.get(ch) > tuning.benchmark_strong_share
            && allocation.get(ch) < tuning.benchmark_starved_share
        {
            warnings.push(Warning::new(
                WarningCode::BenchmarkDeviation,
                Severity::High,
                format!(
                    "{} has an implied share of {:.0}% but receives only {:.1}% of the budget",
                    ch,
                    expected.get(ch) * 100.0,
                    allocation.get(ch) * 100.0
                ),
            ));
        } else if per_channel.value(ch) > tuning.benchmark_channel_warn {
            warnings.push(Warning::new(
                WarningCode::BenchmarkDeviation,
                Severity::Medium,
                format!(
                    "{} deviates {:.0} points from its benchmark-implied share",
                    ch,
                    per_channel.value(ch) * 100.0
                ),
            ));
        }
    }
    if deviation_score > tuning.benchmark_overall_warn {
        warnings.push(Warning::new(
            WarningCode::BenchmarkDeviation,
            Severity::High,
            format!(
                "overall benchmark deviation {:.2} exceeds {:.2}",
                deviation_score, tuning.benchmark_overall_warn
            ),
        ));
    }

    BenchmarkComparison {
        deviation_score: deviation_score.clamp(0.0, 1.0),
        per_channel,
        warnings,
    }
}

/// Blend the available signals into overall and per-channel confidence.
///
/// `benchmark` is `None` when benchmark validation is disabled and
/// `external` is `None` when no external verdict arrived; their weights
/// drop out of the blend in that case.
pub(crate) fn composite(
    results: &[AlgorithmResult],
    consensus: &ConsensusMetrics,
    stability: f64,
    benchmark: Option<&BenchmarkComparison>,
    external: Option<f64>,
    tuning: &TuningConfig,
) -> (f64, PerChannel<f64>) {
    let mean_confidence = if results.is_empty() {
        0.0
    } else {
        results
            .iter()
            .map(|r| r.confidence.clamp(0.0, 1.0))
            .sum::<f64>()
            / results.len() as f64
    };

    let mut terms: Vec<(f64, f64)> = vec![
        (tuning.confidence_weight_algorithms, mean_confidence),
        (tuning.confidence_weight_agreement, consensus.agreement),
        (tuning.confidence_weight_stability, stability),
    ];
    if let Some(benchmark) = benchmark {
        terms.push((
            tuning.confidence_weight_benchmark,
            1.0 - benchmark.deviation_score,
        ));
    }
    if let Some(external) = external {
        terms.push((
            tuning.confidence_weight_external,
            external.clamp(0.0, 1.0),
        ));
    }

    let weight_sum: f64 = terms.iter().map(|(w, _)| w).sum();
    let overall = if weight_sum > 0.0 {
        terms.iter().map(|(w, v)| w * v).sum::<f64>() / weight_sum
    } else {
        0.0
    };

    let per_channel = PerChannel::from_fn(|ch| {
        let spread_penalty = consensus.variance.value(ch).sqrt() * tuning.per_channel_var_scale;
        let deviation_penalty = benchmark
            .map(|b| b.per_channel.value(ch) * tuning.per_channel_dev_weight)
            .unwrap_or(0.0);
        (1.0 - spread_penalty - deviation_penalty).clamp(0.0, 1.0)
    });

    (overall.clamp(0.0, 1.0), per_channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlgorithmKind, ChannelMetrics, Interval};

    fn result(shares: [f64; 4], confidence: f64) -> AlgorithmResult {
        AlgorithmResult {
            algorithm: AlgorithmKind::Gradient,
            allocation: Allocation::from_shares(PerChannel {
                google: shares[0],
                meta: shares[1],
                tiktok: shares[2],
                linkedin: shares[3],
            }),
            confidence,
            performance: 100.0,
            detail: None,
        }
    }

    fn consensus(variance: f64) -> ConsensusMetrics {
        ConsensusMetrics {
            agreement: 0.9,
            variance: PerChannel::from_fn(|_| variance),
            outlier_count: 0,
        }
    }

    fn skewed_priors() -> ChannelPriors {
        PerChannel::from_fn(|ch| {
            let ctr = if ch == Channel::Google { 0.09 } else { 0.01 };
            ChannelMetrics {
                cpm: Interval::new(10.0, 10.0),
                ctr: Interval::new(ctr, ctr),
                cvr: Interval::new(0.2, 0.2),
            }
        })
    }

    #[test]
    fn perfect_clustering_means_full_stability() {
        let combined = Allocation::from_shares(PerChannel {
            google: 0.4,
            meta: 0.3,
            tiktok: 0.2,
            linkedin: 0.1,
        });
        let results = vec![result([0.4, 0.3, 0.2, 0.1], 0.8); 3];
        let s = stability(&results, &combined, &TuningConfig::default());
        assert!((s - 1.0).abs() < 1e-9, "stability {}", s);
    }

    #[test]
    fn scattered_results_lower_stability() {
        let combined = Allocation::equal_split();
        let tight = vec![result([0.26, 0.25, 0.25, 0.24], 0.8)];
        let loose = vec![result([0.7, 0.1, 0.1, 0.1], 0.8)];
        let tuning = TuningConfig::default();
        let s_tight = stability(&tight, &combined, &tuning);
        let s_loose = stability(&loose, &combined, &tuning);
        assert!(s_tight > s_loose, "{} <= {}", s_tight, s_loose);
        assert!((0.0..=1.0).contains(&s_loose));
    }

    #[test]
    fn starving_a_strong_channel_raises_a_high_warning() {
        // Google's implied share is 9/12 = 0.75; give it almost nothing.
        let allocation = Allocation::from_shares(PerChannel {
            google: 0.02,
            meta: 0.38,
            tiktok: 0.3,
            linkedin: 0.3,
        });
        let cmp = benchmark_comparison(&allocation, &skewed_priors(), &TuningConfig::default());
        assert!(cmp.deviation_score > 0.3, "deviation {}", cmp.deviation_score);
        assert!(
            cmp.warnings
                .iter()
                .any(|w| w.code == WarningCode::BenchmarkDeviation && w.severity == Severity::High),
            "warnings: {:?}",
            cmp.warnings
        );
    }

    #[test]
    fn matching_the_benchmark_is_quiet() {
        let expected = Allocation::from_weights(heuristic::efficiency_scores(&skewed_priors()));
        let cmp = benchmark_comparison(&expected, &skewed_priors(), &TuningConfig::default());
        assert!(cmp.deviation_score < 1e-9);
        assert!(cmp.warnings.is_empty(), "warnings: {:?}", cmp.warnings);
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let results = vec![result([0.4, 0.3, 0.2, 0.1], 0.8), result([0.4, 0.3, 0.2, 0.1], 0.6)];
        let tuning = TuningConfig::default();
        let (overall, per_channel) = composite(
            &results,
            &consensus(0.001),
            0.9,
            None,
            Some(0.85),
            &tuning,
        );
        assert!((0.0..=1.0).contains(&overall), "overall {}", overall);
        for &ch in &Channel::ALL {
            assert!((0.0..=1.0).contains(&per_channel.value(ch)));
        }
    }

    #[test]
    fn missing_signals_drop_out_of_the_blend() {
        let results = vec![result([0.25, 0.25, 0.25, 0.25], 0.8)];
        let tuning = TuningConfig::default();
        // agreement 0.9, stability 1.0, mean confidence 0.8, no benchmark,
        // no external: (0.30·0.8 + 0.25·0.9 + 0.20·1.0) / 0.75.
        let (overall, _) = composite(&results, &consensus(0.0), 1.0, None, None, &tuning);
        let expected = (0.30 * 0.8 + 0.25 * 0.9 + 0.20 * 1.0) / 0.75;
        assert!(
            (overall - expected).abs() < 1e-9,
            "overall {} expected {}",
            overall,
            expected
        );
    }

    #[test]
    fn external_signal_shifts_the_blend() {
        let results = vec![result([0.25, 0.25, 0.25, 0.25], 0.8)];
        let tuning = TuningConfig::default();
        let (without, _) = composite(&results, &consensus(0.0), 1.0, None, None, &tuning);
        let (with_low, _) = composite(&results, &consensus(0.0), 1.0, None, Some(0.0), &tuning);
        assert!(with_low < without, "{} >= {}", with_low, without);
    }
}

//! Request options, quality tiers and product-tuning constants.
//!
//! The heuristically-chosen constants sprinkled through the ensemble
//! (outlier thresholds, blend weights, confidence bands) are deliberately
//! kept here as named, overridable configuration rather than literals —
//! they are product tuning, not algorithmic necessities.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts;
use crate::types::AlgorithmKind;

// ============================================================================
// Quality level
// ============================================================================

/// Quality/speed tier selecting the validator set and timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// Gradient + heuristic validators, short timeouts, no Bayesian.
    Fast,
    /// All validators, moderate timeouts.
    #[default]
    Standard,
    /// All validators, long timeouts, external validation on by default.
    Thorough,
}

impl QualityLevel {
    /// Parse from a CLI/API string, defaulting to `Standard`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fast" => Self::Fast,
            "thorough" | "deep" => Self::Thorough,
            _ => Self::Standard,
        }
    }

    /// Validator algorithms launched for this tier. The grid/MC primary
    /// always runs and is not listed here.
    pub(crate) fn validators(&self) -> &'static [AlgorithmKind] {
        match self {
            QualityLevel::Fast => &[AlgorithmKind::Gradient, AlgorithmKind::Heuristic],
            QualityLevel::Standard | QualityLevel::Thorough => &[
                AlgorithmKind::Gradient,
                AlgorithmKind::Bayesian,
                AlgorithmKind::Heuristic,
            ],
        }
    }

    /// Per-validator timeout.
    pub(crate) fn per_algorithm_timeout(&self) -> Duration {
        match self {
            QualityLevel::Fast => Duration::from_millis(1_500),
            QualityLevel::Standard => Duration::from_millis(5_000),
            QualityLevel::Thorough => Duration::from_millis(15_000),
        }
    }

    /// Deadline for the whole validation stage.
    pub(crate) fn stage_timeout(&self) -> Duration {
        match self {
            QualityLevel::Fast => Duration::from_millis(3_000),
            QualityLevel::Standard => Duration::from_millis(10_000),
            QualityLevel::Thorough => Duration::from_millis(20_000),
        }
    }

    /// Whether external semantic validation runs when the caller does not
    /// say either way.
    pub(crate) fn external_validation_default(&self) -> bool {
        matches!(self, QualityLevel::Thorough)
    }
}

// ============================================================================
// Tuning constants
// ============================================================================

/// Named product-tuning constants. Defaults match the shipped calibration;
/// none of them is assumed optimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TuningConfig {
    /// Monte Carlo draws per candidate evaluation.
    pub mc_runs: usize,
    /// How many top grid candidates feed the spread band.
    pub grid_top_n: usize,
    /// Base confidence of the grid/MC primary before spread adjustment.
    pub grid_base_confidence: f64,
    /// Confidence penalty per unit of average spread width.
    pub grid_spread_penalty: f64,
    /// Gradient result confidence when the search converged.
    pub gradient_confidence_converged: f64,
    /// Gradient result confidence when it hit the iteration cap.
    pub gradient_confidence_unconverged: f64,
    /// Fixed heuristic confidence (lower trust than data-driven methods).
    pub heuristic_confidence: f64,
    /// Relative-performance floor for "competitive" in Monte Carlo
    /// comparisons.
    pub competitive_ratio: f64,
    /// Std-dev multiple beyond which a result is an outlier on any channel.
    pub outlier_sigma: f64,
    /// Weight multiplier applied to outlier results (0 removes them).
    pub outlier_weight_factor: f64,
    /// Floor of the performance-normalization factor so the worst result
    /// still contributes through its confidence.
    pub perf_weight_floor: f64,
    /// Scale mapping mean per-channel variance to the agreement score.
    pub agreement_variance_scale: f64,
    /// Final-allocation share above which a concentration warning fires.
    pub concentration_threshold: f64,
    /// Share below which a channel does not count as materially funded.
    pub diversification_floor: f64,
    /// Minimum materially-funded channels before a diversification warning.
    pub min_material_channels: usize,
    /// Performance weight in the alternative-ranking blend.
    pub alt_perf_weight: f64,
    /// Confidence weight in the alternative-ranking blend.
    pub alt_conf_weight: f64,
    /// Scale mapping mean absolute deviation to the stability score.
    pub stability_scale: f64,
    /// Scale mapping per-channel std-dev to per-channel confidence loss.
    pub per_channel_var_scale: f64,
    /// Weight of benchmark deviation in per-channel confidence.
    pub per_channel_dev_weight: f64,
    /// Expected share above which a channel counts as "strong" for
    /// benchmark warnings.
    pub benchmark_strong_share: f64,
    /// Allocated share below which a strong channel counts as starved.
    pub benchmark_starved_share: f64,
    /// Per-channel deviation that triggers a medium benchmark warning.
    pub benchmark_channel_warn: f64,
    /// Overall deviation that triggers a high benchmark warning.
    pub benchmark_overall_warn: f64,
    /// Composite-confidence blend weights. Renormalized over the terms
    /// actually available for a request.
    pub confidence_weight_algorithms: f64,
    pub confidence_weight_agreement: f64,
    pub confidence_weight_stability: f64,
    pub confidence_weight_benchmark: f64,
    pub confidence_weight_external: f64,
    /// Timeout for the external semantic validator call.
    pub external_timeout_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mc_runs: consts::DEFAULT_MC_RUNS,
            grid_top_n: 5,
            grid_base_confidence: 0.85,
            grid_spread_penalty: 0.5,
            gradient_confidence_converged: 0.75,
            gradient_confidence_unconverged: 0.6,
            heuristic_confidence: 0.7,
            competitive_ratio: 0.8,
            outlier_sigma: 2.0,
            outlier_weight_factor: 0.0,
            perf_weight_floor: 0.5,
            agreement_variance_scale: 50.0,
            concentration_threshold: 0.70,
            diversification_floor: 0.05,
            min_material_channels: 2,
            alt_perf_weight: 0.6,
            alt_conf_weight: 0.4,
            stability_scale: 4.0,
            per_channel_var_scale: 4.0,
            per_channel_dev_weight: 0.5,
            benchmark_strong_share: 0.30,
            benchmark_starved_share: 0.05,
            benchmark_channel_warn: 0.25,
            benchmark_overall_warn: 0.35,
            confidence_weight_algorithms: 0.30,
            confidence_weight_agreement: 0.25,
            confidence_weight_stability: 0.20,
            confidence_weight_benchmark: 0.15,
            confidence_weight_external: 0.10,
            external_timeout_ms: 3_000,
        }
    }
}

// ============================================================================
// Request options
// ============================================================================

/// Per-request options for [`crate::EnhancementService::enhance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnhanceOptions {
    pub level: QualityLevel,
    /// Populate `alternatives.top_allocations`; when false the block is
    /// empty with an explanatory note.
    #[serde(default = "default_true")]
    pub include_alternatives: bool,
    /// Run the benchmark deviation comparison; when false it defaults to
    /// zero deviation and no warnings.
    #[serde(default = "default_true")]
    pub validate_against_benchmarks: bool,
    /// Invoke the external semantic validator. `None` falls back to the
    /// quality level's default.
    pub enable_external_validation: Option<bool>,
    /// Override of the global validation-stage timeout.
    pub timeout_ms: Option<u64>,
    /// RNG seed for reproducible runs. `None` seeds from entropy.
    pub seed: Option<u64>,
    pub tuning: TuningConfig,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            level: QualityLevel::default(),
            include_alternatives: true,
            validate_against_benchmarks: true,
            enable_external_validation: None,
            timeout_ms: None,
            seed: None,
            tuning: TuningConfig::default(),
        }
    }
}

impl EnhanceOptions {
    pub fn with_level(level: QualityLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub(crate) fn stage_timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.level.stage_timeout())
    }

    pub(crate) fn external_validation_enabled(&self) -> bool {
        self.enable_external_validation
            .unwrap_or_else(|| self.level.external_validation_default())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parse_is_forgiving() {
        assert_eq!(QualityLevel::parse("fast"), QualityLevel::Fast);
        assert_eq!(QualityLevel::parse("THOROUGH"), QualityLevel::Thorough);
        assert_eq!(QualityLevel::parse("whatever"), QualityLevel::Standard);
    }

    #[test]
    fn fast_tier_skips_bayesian() {
        assert!(!QualityLevel::Fast
            .validators()
            .contains(&AlgorithmKind::Bayesian));
        assert!(QualityLevel::Standard
            .validators()
            .contains(&AlgorithmKind::Bayesian));
    }

    #[test]
    fn timeout_override_wins() {
        let mut opts = EnhanceOptions::default();
        assert_eq!(opts.stage_timeout(), Duration::from_millis(10_000));
        opts.timeout_ms = Some(50);
        assert_eq!(opts.stage_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn external_validation_defaults_by_level() {
        let thorough = EnhanceOptions::with_level(QualityLevel::Thorough);
        assert!(thorough.external_validation_enabled());
        let standard = EnhanceOptions::default();
        assert!(!standard.external_validation_enabled());
        let mut overridden = EnhanceOptions::with_level(QualityLevel::Thorough);
        overridden.enable_external_validation = Some(false);
        assert!(!overridden.external_validation_enabled());
    }

    #[test]
    fn options_deserialize_from_partial_json() {
        let opts: EnhanceOptions =
            serde_json::from_str(r#"{"level":"fast","timeoutMs":250}"#).unwrap();
        assert_eq!(opts.level, QualityLevel::Fast);
        assert_eq!(opts.timeout_ms, Some(250));
        assert!(opts.include_alternatives, "defaults to true");
    }
}

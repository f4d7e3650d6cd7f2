//! Engine-wide numeric constants.
//!
//! Product-tuning constants (blend weights, outlier thresholds, confidence
//! bands) live in [`crate::optimizer::TuningConfig`] so callers can override
//! them; the values here are either hard numerical guards or the defaults
//! that config falls back to.

/// Tolerance for the allocation sum-to-one invariant.
pub const SUM_TOLERANCE: f64 = 1e-5;

/// Tolerance applied when checking min/max constraints.
pub(crate) const CONSTRAINT_TOLERANCE: f64 = 1e-6;

/// Denominator clamp for cost-per-acquisition when conversions are ~zero.
pub const CAC_EPSILON: f64 = 1e-9;

/// Per-channel tolerance for structural equality of allocations
/// (deduplication of alternatives).
pub(crate) const DEDUP_TOLERANCE: f64 = 0.01;

/// Default Monte Carlo sample count.
pub(crate) const DEFAULT_MC_RUNS: usize = 800;

/// Simplex grid step count: 10% increments over four channels.
pub(crate) const GRID_STEPS: u32 = 10;

/// Regularization added to near-zero pivots during Gaussian elimination.
pub(crate) const PIVOT_EPSILON: f64 = 1e-10;
pub(crate) const PIVOT_REGULARIZATION: f64 = 1e-8;

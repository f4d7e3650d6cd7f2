//! Core value types shared across the optimization engine.
//!
//! Everything here is a plain serde-derived value type: created per request,
//! passed by value or shared reference through the optimizers, and dropped
//! when the request completes. No type in this module owns shared mutable
//! state.

use serde::{Deserialize, Serialize};

use crate::consts;

// ============================================================================
// Channel
// ============================================================================

/// One advertising platform. The set is closed: the whole engine works over
/// exactly these four channels and is not extensible at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Google,
    Meta,
    Tiktok,
    Linkedin,
}

impl Channel {
    /// All channels in canonical iteration order.
    pub const ALL: [Channel; 4] = [
        Channel::Google,
        Channel::Meta,
        Channel::Tiktok,
        Channel::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Google => "google",
            Channel::Meta => "meta",
            Channel::Tiktok => "tiktok",
            Channel::Linkedin => "linkedin",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Per-channel maps
// ============================================================================

/// A total mapping from [`Channel`] to `T`.
///
/// Used for allocations, per-channel variances, confidences and deviation
/// scores. Serializes as an object keyed by channel name.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerChannel<T> {
    pub google: T,
    pub meta: T,
    pub tiktok: T,
    pub linkedin: T,
}

impl<T> PerChannel<T> {
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self {
            google: f(Channel::Google),
            meta: f(Channel::Meta),
            tiktok: f(Channel::Tiktok),
            linkedin: f(Channel::Linkedin),
        }
    }

    pub fn get(&self, channel: Channel) -> &T {
        match channel {
            Channel::Google => &self.google,
            Channel::Meta => &self.meta,
            Channel::Tiktok => &self.tiktok,
            Channel::Linkedin => &self.linkedin,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut T {
        match channel {
            Channel::Google => &mut self.google,
            Channel::Meta => &mut self.meta,
            Channel::Tiktok => &mut self.tiktok,
            Channel::Linkedin => &mut self.linkedin,
        }
    }
}

impl<T: Copy> PerChannel<T> {
    pub fn value(&self, channel: Channel) -> T {
        *self.get(channel)
    }
}

/// A partial mapping from [`Channel`] to a fraction, used for per-channel
/// floor (`min_pct`) and ceiling (`max_pct`) constraints. Absent entries
/// mean "unconstrained".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialShares {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiktok: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<f64>,
}

impl PartialShares {
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Google => self.google,
            Channel::Meta => self.meta,
            Channel::Tiktok => self.tiktok,
            Channel::Linkedin => self.linkedin,
        }
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        let slot = match channel {
            Channel::Google => &mut self.google,
            Channel::Meta => &mut self.meta,
            Channel::Tiktok => &mut self.tiktok,
            Channel::Linkedin => &mut self.linkedin,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|&ch| self.get(ch).is_none())
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// A fractional budget split across the four channels.
///
/// Invariant: the fractions are nonnegative and sum to 1 within
/// [`consts::SUM_TOLERANCE`]. Constructors that cannot guarantee the
/// invariant (e.g. [`Allocation::from_weights`]) renormalize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation {
    shares: PerChannel<f64>,
}

impl Allocation {
    /// Build from raw shares without renormalizing. Callers must uphold the
    /// sum-to-one invariant themselves.
    pub fn from_shares(shares: PerChannel<f64>) -> Self {
        Self { shares }
    }

    /// Build from nonnegative weights, renormalizing so the shares sum to 1.
    /// A zero or non-finite weight vector falls back to an equal split.
    pub fn from_weights(weights: PerChannel<f64>) -> Self {
        let clamped = PerChannel::from_fn(|ch| weights.value(ch).max(0.0));
        let total: f64 = Channel::ALL.iter().map(|&ch| clamped.value(ch)).sum();
        if total <= 0.0 || !total.is_finite() {
            return Self::equal_split();
        }
        Self {
            shares: PerChannel::from_fn(|ch| clamped.value(ch) / total),
        }
    }

    pub fn equal_split() -> Self {
        Self {
            shares: PerChannel::from_fn(|_| 0.25),
        }
    }

    pub fn get(&self, channel: Channel) -> f64 {
        self.shares.value(channel)
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        *self.shares.get_mut(channel) = value;
    }

    pub fn shares(&self) -> &PerChannel<f64> {
        &self.shares
    }

    pub fn sum(&self) -> f64 {
        Channel::ALL.iter().map(|&ch| self.get(ch)).sum()
    }

    /// Renormalized copy. Falls back to an equal split when the total mass
    /// is zero or non-finite.
    pub fn normalized(&self) -> Self {
        Self::from_weights(self.shares)
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.google(), self.meta(), self.tiktok(), self.linkedin()]
    }

    pub fn google(&self) -> f64 {
        self.shares.google
    }

    pub fn meta(&self) -> f64 {
        self.shares.meta
    }

    pub fn tiktok(&self) -> f64 {
        self.shares.tiktok
    }

    pub fn linkedin(&self) -> f64 {
        self.shares.linkedin
    }

    /// Structural equality within a per-channel tolerance. Used for
    /// deduplicating alternatives.
    pub fn approx_eq(&self, other: &Allocation, tolerance: f64) -> bool {
        Channel::ALL
            .iter()
            .all(|&ch| (self.get(ch) - other.get(ch)).abs() < tolerance)
    }

    /// The channel carrying the largest share, with its share.
    pub fn max_share(&self) -> (Channel, f64) {
        let mut best = (Channel::Google, self.get(Channel::Google));
        for &ch in &Channel::ALL[1..] {
            let v = self.get(ch);
            if v > best.1 {
                best = (ch, v);
            }
        }
        best
    }

    /// Number of channels receiving at least `floor` of the budget.
    pub fn material_channels(&self, floor: f64) -> usize {
        Channel::ALL.iter().filter(|&&ch| self.get(ch) >= floor).count()
    }

    pub fn sums_to_one(&self) -> bool {
        (self.sum() - 1.0).abs() <= consts::SUM_TOLERANCE
    }
}

// ============================================================================
// Priors
// ============================================================================

/// A closed interval `[low, high]` describing an uncertain quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub low: f64,
    pub high: f64,
}

impl Interval {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    /// Uniform draw from the interval.
    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> f64 {
        if self.width() <= 0.0 {
            return self.low;
        }
        // Closed interval: high is a legal draw.
        rng.gen_range(self.low..=self.high)
    }
}

/// Uncertain performance characteristics of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    /// Cost per 1000 impressions, in currency units. Strictly positive.
    pub cpm: Interval,
    /// Click-through rate in [0, 1].
    pub ctr: Interval,
    /// Conversion rate in [0, 1].
    pub cvr: Interval,
}

/// Per-channel performance priors for one optimization request. Read-only
/// through the core.
pub type ChannelPriors = PerChannel<ChannelMetrics>;

// ============================================================================
// Goal & direction
// ============================================================================

/// The business objective being optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    /// Maximize lead / demo count.
    Demos,
    /// Maximize revenue (conversions × average deal size).
    Revenue,
    /// Minimize cost per acquisition.
    Cac,
}

impl Goal {
    pub fn direction(&self) -> Direction {
        match self {
            Goal::Cac => Direction::Minimize,
            Goal::Demos | Goal::Revenue => Direction::Maximize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Demos => "demos",
            Goal::Revenue => "revenue",
            Goal::Cac => "cac",
        }
    }
}

/// Optimization direction, derived once from [`Goal`] and threaded through
/// every ranking, acquisition and ensemble step so the "cac is minimize"
/// branch lives in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `a` is a strictly better objective value than `b`.
    pub fn better(&self, a: f64, b: f64) -> bool {
        match self {
            Direction::Maximize => a > b,
            Direction::Minimize => a < b,
        }
    }

    /// Worst representable objective value, used to seed "best so far".
    pub fn worst(&self) -> f64 {
        match self {
            Direction::Maximize => f64::NEG_INFINITY,
            Direction::Minimize => f64::INFINITY,
        }
    }

    /// +1 for maximize, -1 for minimize. Multiplying objective values by
    /// this sign turns every search into a maximization.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Maximize => 1.0,
            Direction::Minimize => -1.0,
        }
    }
}

// ============================================================================
// Assumptions
// ============================================================================

/// Request-level configuration for the objective and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub goal: Goal,
    /// Required (semantically) when `goal` is `revenue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_deal_size: Option<f64>,
    /// Informational target when `goal` is `cac`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cac: Option<f64>,
    /// Per-channel allocation floors.
    #[serde(default)]
    pub min_pct: PartialShares,
    /// Per-channel allocation ceilings.
    #[serde(default)]
    pub max_pct: PartialShares,
}

impl Assumptions {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            avg_deal_size: None,
            target_cac: None,
            min_pct: PartialShares::default(),
            max_pct: PartialShares::default(),
        }
    }
}

// ============================================================================
// Algorithm results
// ============================================================================

/// Which optimizer produced a result. `GridMonteCarlo` is the primary; the
/// rest are validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    GridMonteCarlo,
    Gradient,
    Bayesian,
    Heuristic,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::GridMonteCarlo => "grid_monte_carlo",
            AlgorithmKind::Gradient => "gradient",
            AlgorithmKind::Bayesian => "bayesian",
            AlgorithmKind::Heuristic => "heuristic",
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub algorithm: AlgorithmKind,
    pub allocation: Allocation,
    /// Self-reported trust in the result, in [0, 1].
    pub confidence: f64,
    /// Raw objective value in the goal's units.
    pub performance: f64,
    /// Optional diagnostic metadata (iteration counts, traces, bands).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// 10th/50th/90th percentile band of Monte Carlo objective values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeBand {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

// ============================================================================
// Consensus, confidence, warnings
// ============================================================================

/// Cross-algorithm agreement metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMetrics {
    /// Normalized inverse-variance agreement score in [0, 1].
    pub agreement: f64,
    /// Per-channel variance of allocation shares across algorithms.
    pub variance: PerChannel<f64>,
    /// Number of results flagged as outliers.
    pub outlier_count: usize,
}

/// Structured warning severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Machine-readable warning categories attached to results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    PortfolioConcentration,
    InsufficientDiversification,
    BenchmarkDeviation,
    DegradedPipeline,
    ValidatorsIncomplete,
    ExternalValidationUnavailable,
}

/// One structured warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub severity: Severity,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
        }
    }
}

/// Composite confidence attached to the enhanced result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    /// Blended overall confidence in [0, 1].
    pub overall: f64,
    /// Per-channel confidence in [0, 1].
    pub per_channel: PerChannel<f64>,
    /// How tightly the algorithms clustered, in [0, 1].
    pub stability: f64,
    /// Every contributing algorithm result, primary included.
    pub algorithms: Vec<AlgorithmResult>,
    pub consensus: ConsensusMetrics,
}

/// Benchmark deviation report. The default value is the explicit
/// "benchmark validation disabled" state: zero deviation, no warnings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    /// Aggregate deviation from the prior-implied spend pattern, in [0, 1].
    pub deviation_score: f64,
    /// Per-channel deviation scores in [0, 1].
    pub per_channel: PerChannel<f64>,
    pub warnings: Vec<Warning>,
}

/// Verdict returned by the external semantic validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

// ============================================================================
// Enhanced result
// ============================================================================

/// One alternative allocation surfaced alongside the final recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAllocation {
    pub allocation: Allocation,
    /// Blended performance/confidence ranking score.
    pub score: f64,
    pub performance: f64,
    pub confidence: f64,
    pub source: AlgorithmKind,
    pub reasoning: String,
}

/// Alternative allocations block of the enhanced result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Alternatives {
    pub top_allocations: Vec<RankedAllocation>,
    /// Present when alternatives were not requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Validation block of the enhanced result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub benchmark: BenchmarkComparison,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ValidationVerdict>,
    pub warnings: Vec<Warning>,
}

/// The full response of one optimization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedModelResult {
    pub goal: Goal,
    pub budget: f64,
    /// The final ensembled allocation. Sums to 1.
    pub allocation: Allocation,
    /// Deterministic objective value of the final allocation.
    pub performance: f64,
    /// Monte Carlo outcome band of the final allocation.
    pub outcome: OutcomeBand,
    pub confidence: ConfidenceMetrics,
    pub validation: ValidationReport,
    pub alternatives: Alternatives,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_split_sums_to_one() {
        let a = Allocation::equal_split();
        assert!(a.sums_to_one(), "equal split should sum to 1, got {}", a.sum());
    }

    #[test]
    fn from_weights_normalizes() {
        let a = Allocation::from_weights(PerChannel {
            google: 2.0,
            meta: 1.0,
            tiktok: 1.0,
            linkedin: 0.0,
        });
        assert!(a.sums_to_one());
        assert!((a.google() - 0.5).abs() < 1e-12);
        assert_eq!(a.linkedin(), 0.0);
    }

    #[test]
    fn from_weights_zero_mass_falls_back_to_equal() {
        let a = Allocation::from_weights(PerChannel::default());
        assert_eq!(a, Allocation::equal_split());
    }

    #[test]
    fn approx_eq_uses_per_channel_tolerance() {
        let a = Allocation::equal_split();
        let mut b = a;
        b.set(Channel::Google, 0.2549);
        b.set(Channel::Meta, 0.2451);
        assert!(a.approx_eq(&b, 0.01), "within tolerance");
        b.set(Channel::Google, 0.30);
        assert!(!a.approx_eq(&b, 0.01), "outside tolerance");
    }

    #[test]
    fn direction_better_flips_for_minimize() {
        assert!(Direction::Maximize.better(2.0, 1.0));
        assert!(Direction::Minimize.better(1.0, 2.0));
        assert!(!Direction::Minimize.better(2.0, 1.0));
        assert_eq!(Goal::Cac.direction(), Direction::Minimize);
        assert_eq!(Goal::Revenue.direction(), Direction::Maximize);
    }

    #[test]
    fn interval_sample_stays_in_bounds() {
        use rand::{rngs::SmallRng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(7);
        let iv = Interval::new(10.0, 20.0);
        for _ in 0..100 {
            let v = iv.sample(&mut rng);
            assert!((10.0..=20.0).contains(&v), "sample {} out of bounds", v);
        }
        let point = Interval::new(5.0, 5.0);
        assert_eq!(point.sample(&mut rng), 5.0);
    }

    #[test]
    fn channel_serde_round_trip() {
        let json = serde_json::to_string(&Channel::Linkedin).unwrap();
        assert_eq!(json, "\"linkedin\"");
        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Channel::Linkedin);
    }

    #[test]
    fn assumptions_deserialize_with_defaults() {
        let a: Assumptions = serde_json::from_str(r#"{"goal":"demos"}"#).unwrap();
        assert_eq!(a.goal, Goal::Demos);
        assert!(a.min_pct.is_empty());
        assert!(a.max_pct.is_empty());
    }
}

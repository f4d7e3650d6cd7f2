//! mixopt — uncertainty-aware ad-budget allocation engine.
//!
//! Allocates a budget across four advertising channels (google, meta,
//! tiktok, linkedin) to maximize demos or revenue, or minimize cost per
//! acquisition, when channel performance (CPM/CTR/CVR) is only known as
//! intervals. Four independent optimizers search the constrained allocation
//! simplex; an ensemble combiner merges whichever finish within their
//! timeouts into a single recommendation with a calibrated confidence score.
//!
//! Entry point: [`EnhancementService::enhance`].

#![deny(unreachable_pub)]

mod consts;
mod errors;
mod optimizer;
pub mod types;

pub use consts::{CAC_EPSILON, SUM_TOLERANCE};
pub use errors::{OptimizeError, Result};
pub use optimizer::{
    bayesian::{Acquisition, BayesianConfig},
    config::{EnhanceOptions, QualityLevel, TuningConfig},
    service::EnhancementService,
    validation::{SemanticValidator, ValidationContext},
    CancelToken,
};
pub use types::{
    AlgorithmKind, AlgorithmResult, Allocation, Alternatives, Assumptions, BenchmarkComparison,
    Channel, ChannelMetrics, ChannelPriors, ConfidenceMetrics, ConsensusMetrics, Direction,
    EnhancedModelResult, Goal, Interval, OutcomeBand, PartialShares, PerChannel,
    RankedAllocation, Severity, ValidationReport, ValidationVerdict, Warning, WarningCode,
};

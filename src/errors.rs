//! Error taxonomy for the optimization engine.
//!
//! Only [`OptimizeError::InvalidInput`] and
//! [`OptimizeError::InfeasibleConstraints`] may surface as request-level
//! failures; every other variant is recovered inside the pipeline and
//! degrades the result (fewer contributing algorithms, lower confidence,
//! explanatory warnings) instead of failing it.

use thiserror::Error;

use crate::types::AlgorithmKind;

/// Engine error type.
#[derive(Error, Debug, Clone)]
pub enum OptimizeError {
    /// Malformed request rejected before any optimizer runs.
    #[error("invalid input: {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// No allocation can satisfy the stated min/max constraints.
    #[error("infeasible constraints: {0}")]
    InfeasibleConstraints(String),

    /// A validator algorithm exceeded its own or the global timeout.
    /// Recovered locally; never propagated to the caller.
    #[error("algorithm {algorithm} timed out after {timeout_ms} ms")]
    AlgorithmTimeout {
        algorithm: AlgorithmKind,
        timeout_ms: u64,
    },

    /// A validator algorithm failed internally (e.g. unrecoverable
    /// numerical issues). Recovered locally; treated like a timeout.
    #[error("algorithm {algorithm} failed: {message}")]
    AlgorithmFailure {
        algorithm: AlgorithmKind,
        message: String,
    },

    /// The external semantic validator errored or returned garbage.
    /// Recovered locally; confidence is computed from local signals only.
    #[error("external validation failed: {0}")]
    ExternalValidation(String),
}

impl OptimizeError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;

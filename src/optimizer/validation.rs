//! External semantic validation seam.
//!
//! The engine never talks to an LLM or any network service directly; it
//! calls whatever [`SemanticValidator`] the host wires in, under a timeout,
//! and treats any failure as "no external signal". The default deployment
//! runs without one.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{Allocation, Assumptions, ChannelPriors, ValidationVerdict};

/// Request context handed to the validator alongside the allocation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub budget: f64,
    pub priors: &'a ChannelPriors,
    pub assumptions: &'a Assumptions,
}

/// Host-provided semantic sanity check of a final allocation.
///
/// Implementations may do anything (LLM calls, rule engines, humans); the
/// engine only requires that the returned confidence is in [0, 1]. Errors
/// and timeouts degrade the request instead of failing it.
#[async_trait]
pub trait SemanticValidator: Send + Sync {
    async fn validate(
        &self,
        allocation: &Allocation,
        context: ValidationContext<'_>,
    ) -> Result<ValidationVerdict>;
}

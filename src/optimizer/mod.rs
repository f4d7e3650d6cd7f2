//! The optimization core: objective model, four search strategies, ensemble
//! combination and confidence scoring, orchestrated by
//! [`service::EnhancementService`].
//!
//! ```text
//! budget + priors + assumptions
//!        │
//!        ▼
//!   grid/MC (primary, synchronous)
//!        │
//!        ├─► gradient ┐
//!        ├─► bayesian ├─ parallel validators, per-task + global timeouts
//!        └─► heuristic┘
//!        │
//!        ▼
//!   ensemble combine ─► confidence scoring ─► alternatives
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) mod bayesian;
pub(crate) mod confidence;
pub(crate) mod config;
pub(crate) mod constraints;
pub(crate) mod ensemble;
pub(crate) mod gradient;
pub(crate) mod grid;
pub(crate) mod heuristic;
pub(crate) mod objective;
pub(crate) mod service;
pub(crate) mod validation;

/// Cooperative cancellation flag handed to long-running optimizer loops.
///
/// Timeout handling is "abandon and ignore": a task that misses its deadline
/// is dropped from the ensemble, but its thread keeps running. The token lets
/// the loop notice and bail out instead of burning CPU to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

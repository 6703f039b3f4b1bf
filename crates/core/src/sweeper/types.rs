//! Sweeper report types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::StoreError;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Application ids touched by one sweep, by result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Reset to `queued` by this sweep.
    pub recovered: Vec<String>,
    /// Recovered and re-triggered without an orchestrator error.
    pub triggered: Vec<String>,
    /// Reset or re-trigger failed.
    pub failed: Vec<String>,
    /// Changed by another writer between listing and reset.
    pub skipped: Vec<String>,
    /// Stalled with no attempts left; needs manual intervention.
    pub exhausted: Vec<String>,
}

/// Result of an operator error-recovery batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverErrorsReport {
    pub dry_run: bool,
    /// Reset to `queued` (or, on a dry run, eligible for reset).
    pub retried: Vec<String>,
    /// Failed for budget reasons; never retried automatically.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

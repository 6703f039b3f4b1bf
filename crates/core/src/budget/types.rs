//! Budget types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::StoreError;

/// Budget position of one application inside the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetStatus {
    pub application_id: String,
    /// `call_count < max`.
    pub within_budget: bool,
    pub call_count: u64,
    pub remaining: u64,
    pub max: u64,
    pub window_hours: u32,
    /// True when the call log could not be read and the check let the
    /// application through.
    pub fail_open: bool,
}

impl BudgetStatus {
    pub(crate) fn counted(application_id: String, call_count: u64, max: u64, window_hours: u32) -> Self {
        Self {
            application_id,
            within_budget: call_count < max,
            call_count,
            remaining: max.saturating_sub(call_count),
            max,
            window_hours,
            fail_open: false,
        }
    }

    pub(crate) fn failed_open(application_id: String, max: u64, window_hours: u32) -> Self {
        Self {
            application_id,
            within_budget: true,
            call_count: 0,
            remaining: max,
            max,
            window_hours,
            fail_open: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum BudgetError {
    /// The application was over budget and has been moved to `error`.
    #[error(
        "API budget exceeded for {}: {} calls in the last {}h (max {})",
        .0.application_id, .0.call_count, .0.window_hours, .0.max
    )]
    Exceeded(BudgetStatus),

    #[error("application store error: {0}")]
    Store(#[from] StoreError),
}

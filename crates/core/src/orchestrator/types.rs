//! Types for the application orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{ApplicationStatus, StoreError};

/// Errors that can occur during orchestration.
///
/// Business outcomes (retry, failure, lost races) are reported through
/// [`OrchestrationOutcome`]; this type only covers calls that could not be
/// carried out at all.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("cannot {operation} application {application_id} in status {status}")]
    InvalidState {
        application_id: String,
        status: ApplicationStatus,
        operation: String,
    },

    /// Another writer changed the application first.
    #[error("application {0} was modified concurrently")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a single `orchestrate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrchestrationOutcome {
    /// The phase succeeded and the status moved forward.
    Advanced {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    /// A retryable failure; the application waits at its current status.
    RetryScheduled {
        status: ApplicationStatus,
        attempts: u32,
        error_code: String,
        next_run_at: DateTime<Utc>,
    },
    /// The application was moved to `error`.
    Failed {
        from: ApplicationStatus,
        error_code: String,
        attempts: u32,
    },
    /// The API call budget is spent; the application is in `error`.
    BudgetExceeded { call_count: u64, max: u64 },
    /// Nothing to do: `complete` or `error`.
    AlreadyTerminal { status: ApplicationStatus },
    /// Another orchestrator holds a live advisory lock.
    Locked,
    /// The revision moved underneath this call; nothing was written.
    Conflict,
}

impl OrchestrationOutcome {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            OrchestrationOutcome::Advanced { .. } => "advanced",
            OrchestrationOutcome::RetryScheduled { .. } => "retry_scheduled",
            OrchestrationOutcome::Failed { .. } => "failed",
            OrchestrationOutcome::BudgetExceeded { .. } => "budget_exceeded",
            OrchestrationOutcome::AlreadyTerminal { .. } => "already_terminal",
            OrchestrationOutcome::Locked => "locked",
            OrchestrationOutcome::Conflict => "conflict",
        }
    }

    /// Whether this call changed the stored application.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            OrchestrationOutcome::Advanced { .. }
                | OrchestrationOutcome::RetryScheduled { .. }
                | OrchestrationOutcome::Failed { .. }
                | OrchestrationOutcome::BudgetExceeded { .. }
        )
    }
}

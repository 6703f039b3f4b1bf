//! Dispatch report types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::StoreError;
use crate::orchestrator::OrchestrationOutcome;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Due applications could not be listed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one dispatched application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchResult {
    /// `orchestrate` returned; the outcome may still be a retry or failure.
    Completed { outcome: OrchestrationOutcome },
    /// `orchestrate` returned an error.
    Error { message: String },
    /// The orchestration task panicked.
    Panicked { message: String },
}

impl DispatchResult {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchResult::Completed { .. } => "completed",
            DispatchResult::Error { .. } => "error",
            DispatchResult::Panicked { .. } => "panicked",
        }
    }

    /// Whether `orchestrate` returned an outcome, whatever that outcome was.
    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchResult::Completed { .. })
    }

    /// Whether the application moved to its next status.
    pub fn is_advanced(&self) -> bool {
        matches!(
            self,
            DispatchResult::Completed {
                outcome: OrchestrationOutcome::Advanced { .. }
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub application_id: String,
    #[serde(flatten)]
    pub result: DispatchResult,
}

/// Summary of one [`DispatchPool::run_once`](super::DispatchPool::run_once).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Distinct applications taken from the due list.
    pub picked: usize,
    /// One entry per picked application, in pick order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Items whose orchestration returned an outcome, including retries,
    /// failures and no-ops.
    pub completed: usize,
    /// Items that moved to their next status.
    pub advanced: usize,
    /// Items whose orchestration errored or panicked.
    pub failed: usize,
    pub duration_ms: u64,
}

impl DispatchReport {
    pub(crate) fn from_outcomes(outcomes: Vec<DispatchOutcome>, duration_ms: u64) -> Self {
        let completed = outcomes.iter().filter(|o| o.result.is_completed()).count();
        let advanced = outcomes.iter().filter(|o| o.result.is_advanced()).count();
        Self {
            picked: outcomes.len(),
            failed: outcomes.len() - completed,
            completed,
            advanced,
            outcomes,
            duration_ms,
        }
    }
}

//! Pipeline control endpoints: dispatch, sweeps, error recovery and status.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use feasibility_core::{ApplicationStatus, DispatchReport, RecoverErrorsReport, SweepReport};

use super::handlers::{api_error, ApiError};
use crate::scheduler::SchedulerStatus;
use crate::state::AppState;

/// Upper bound for a single recover-errors batch.
const MAX_RECOVER_LIMIT: usize = 500;

/// Request body for error recovery.
#[derive(Debug, Deserialize)]
pub struct RecoverErrorsBody {
    /// Maximum number of `error` applications to consider (default 50).
    #[serde(default = "default_recover_limit")]
    pub limit: usize,
    /// Only list what would be retried.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_recover_limit() -> usize {
    50
}

/// Response for pipeline status endpoint.
#[derive(Debug, Serialize)]
pub struct PipelineStatusResponse {
    pub scheduler: SchedulerStatus,
    /// Count per status; every status is present.
    pub applications_by_status: BTreeMap<String, i64>,
    pub total: i64,
}

/// Run one dispatch batch now.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DispatchReport>, ApiError> {
    state
        .dispatch()
        .run_once()
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Run one stalled-job sweep now.
pub async fn sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>, ApiError> {
    state
        .sweeper()
        .sweep()
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Force-retry `error` applications that did not fail on budget.
pub async fn recover_errors(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecoverErrorsBody>,
) -> Result<Json<RecoverErrorsReport>, ApiError> {
    if body.limit == 0 || body.limit > MAX_RECOVER_LIMIT {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_RECOVER_LIMIT),
        ));
    }

    state
        .sweeper()
        .recover_errors(body.limit, body.dry_run)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Scheduler state and application counts.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PipelineStatusResponse>, ApiError> {
    let counts = state
        .store()
        .count_by_status()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let applications_by_status: BTreeMap<String, i64> = ApplicationStatus::ALL
        .iter()
        .map(|status| {
            (
                status.as_str().to_string(),
                counts.get(status).copied().unwrap_or(0),
            )
        })
        .collect();
    let total = applications_by_status.values().sum();

    Ok(Json(PipelineStatusResponse {
        scheduler: state.scheduler().status(),
        applications_by_status,
        total,
    }))
}

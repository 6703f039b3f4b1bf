//! Budget endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use feasibility_core::BudgetStatus;

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// Maximum number of ids in one bulk check
const MAX_BULK_IDS: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct BulkBudgetBody {
    pub application_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkBudgetResponse {
    /// One entry per distinct id, in request order.
    pub budgets: Vec<BudgetStatus>,
}

/// Budget position of one application
pub async fn get_budget(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BudgetStatus>, ApiError> {
    match state.store().get(&id) {
        Ok(Some(_)) => Ok(Json(state.ledger().check_budget(&id))),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Application not found: {}", id),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Budget positions for many applications from a single grouped count
pub async fn bulk_budget(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkBudgetBody>,
) -> Result<Json<BulkBudgetResponse>, ApiError> {
    if body.application_ids.len() > MAX_BULK_IDS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("at most {} application ids per request", MAX_BULK_IDS),
        ));
    }

    let mut statuses = state.ledger().check_budgets(&body.application_ids);
    let budgets = body
        .application_ids
        .iter()
        .filter_map(|id| statuses.remove(id))
        .collect();

    Ok(Json(BulkBudgetResponse { budgets }))
}

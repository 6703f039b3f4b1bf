use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use feasibility_core::audit::{AuditFilter, AuditPage, AuditRecord};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for audit queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub application_id: Option<String>,
    /// e.g. `status_changed`, `budget_exceeded`
    pub event_type: Option<String>,
    /// Events at or after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    /// Filter without pagination, shared by the query and the count.
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            application_id: self.application_id.clone(),
            event_type: self.event_type.clone(),
            since: self.from,
            until: self.to,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Total matching events, ignoring limit and offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query audit events, newest first
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let filter = params.filter();
    let events = state
        .audit_store()
        .page(&filter, AuditPage { limit, offset })
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query audit events: {}", e),
            )
        })?;
    let total = state.audit_store().count(&filter).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count audit events: {}", e),
        )
    })?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}

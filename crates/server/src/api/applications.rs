//! Application API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use feasibility_core::{
    audit::AuditEvent, phase::PhaseMetricRecord, Application, ApplicationFilter,
    ApplicationStatus, CreateApplicationRequest, OrchestrationOutcome,
};

use super::handlers::{api_error, orchestrator_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for application queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for application queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating an application
#[derive(Debug, Deserialize)]
pub struct CreateApplicationBody {
    /// Property address to assess
    pub address: String,
    /// Whether payment has been confirmed (default true)
    #[serde(default = "default_payment_confirmed")]
    pub payment_confirmed: bool,
}

fn default_payment_confirmed() -> bool {
    true
}

/// Query parameters for listing applications
#[derive(Debug, Deserialize)]
pub struct ListApplicationsParams {
    /// Filter by status
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// An application plus its user-facing progress
#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    #[serde(flatten)]
    pub application: Application,
    pub progress_percent: u8,
    pub stage_label: &'static str,
}

impl From<Application> for ApplicationResponse {
    fn from(application: Application) -> Self {
        Self {
            progress_percent: application.status.progress_percent(),
            stage_label: application.status.stage_label(),
            application,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListApplicationsResponse {
    pub applications: Vec<ApplicationResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct PhasesResponse {
    pub application_id: String,
    pub phases: Vec<PhaseMetricRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new application in `queued`
pub async fn create_application(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateApplicationBody>,
) -> Result<(StatusCode, Json<ApplicationResponse>), ApiError> {
    let address = body.address.trim();
    if address.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "address cannot be empty"));
    }

    let request = CreateApplicationRequest {
        address: address.to_string(),
        payment_confirmed: body.payment_confirmed,
    };

    let application = state
        .store()
        .create(request)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    state.audit().try_emit(AuditEvent::ApplicationCreated {
        application_id: application.id.clone(),
        address: application.address.clone(),
        payment_confirmed: application.payment_confirmed,
    });
    tracing::info!(application_id = %application.id, "Application created");

    Ok((StatusCode::CREATED, Json(ApplicationResponse::from(application))))
}

/// Get an application by ID
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    match state.store().get(&id) {
        Ok(Some(application)) => Ok(Json(ApplicationResponse::from(application))),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Application not found: {}", id),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// List applications, newest first
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListApplicationsParams>,
) -> Result<Json<ListApplicationsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = ApplicationFilter::new();
    if let Some(ref status) = params.status {
        let status = status
            .parse::<ApplicationStatus>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        base_filter = base_filter.with_status(status);
    }

    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let applications = state
        .store()
        .list(&query_filter)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let total = state
        .store()
        .count(&base_filter)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ListApplicationsResponse {
        applications: applications.into_iter().map(ApplicationResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Phase execution history for one application
pub async fn list_phases(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PhasesResponse>, ApiError> {
    match state.store().get(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Application not found: {}", id),
            ))
        }
        Err(e) => return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }

    let phases = state
        .metric_store()
        .list_for_application(&id)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(PhasesResponse {
        application_id: id,
        phases,
    }))
}

/// Run one orchestration step now
pub async fn orchestrate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrchestrationOutcome>, ApiError> {
    state
        .orchestrator()
        .orchestrate(&id)
        .await
        .map(Json)
        .map_err(orchestrator_error)
}

/// Operator reset back to `queued`
pub async fn force_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApplicationResponse>, ApiError> {
    state
        .orchestrator()
        .force_retry(&id)
        .await
        .map(|application| Json(ApplicationResponse::from(application)))
        .map_err(orchestrator_error)
}

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{applications, audit, budget, handlers, middleware::metrics_middleware, pipeline};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Applications
        .route(
            "/applications",
            post(applications::create_application).get(applications::list_applications),
        )
        .route("/applications/{id}", get(applications::get_application))
        .route("/applications/{id}/phases", get(applications::list_phases))
        .route(
            "/applications/{id}/orchestrate",
            post(applications::orchestrate),
        )
        .route("/applications/{id}/retry", post(applications::force_retry))
        // Pipeline control
        .route("/pipeline/dispatch", post(pipeline::dispatch))
        .route("/pipeline/sweep", post(pipeline::sweep))
        .route("/pipeline/recover-errors", post(pipeline::recover_errors))
        .route("/pipeline/status", get(pipeline::get_status))
        // Budget
        .route("/budget/bulk", post(budget::bulk_budget))
        .route("/budget/{id}", get(budget::get_budget))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

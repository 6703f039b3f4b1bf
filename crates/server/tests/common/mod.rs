//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that wires the full server state over
//! a temporary database with mock collaborators, so the router can be driven
//! in-process without any external service.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use feasibility_core::{
    audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore},
    load_config_from_str,
    testing::fixtures::MockCollaborators,
};
use feasibility_server::{api::create_router, state::AppState};

/// In-process server over a temporary database.
///
/// The scheduler is disabled; tests drive dispatch and sweeps through the API.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_intake() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/applications", json!({
///         "address": "350 Fifth Avenue"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    /// Mock collaborators (providers `census` and `flood_zone`)
    pub mocks: MockCollaborators,
    pub audit_store: Arc<dyn AuditStore>,
    /// Keeps the database alive for the fixture's lifetime
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config("").await
    }

    /// Create a fixture with extra TOML appended to the base configuration.
    pub async fn with_config(extra_toml: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let toml = format!(
            "[database]\npath = \"{}\"\n\n[scheduler]\nenabled = false\n\n{}",
            db_path.display(),
            extra_toml
        );
        let config = load_config_from_str(&toml).expect("Failed to parse test config");

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let mocks = MockCollaborators::new(&["census", "flood_zone"]);
        let state = Arc::new(
            AppState::open(
                config,
                mocks.collaborators(),
                audit_handle,
                Arc::clone(&audit_store),
            )
            .expect("Failed to open app state"),
        );
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            mocks,
            audit_store,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Create an application and return its id.
    pub async fn create_application(&self, address: &str) -> String {
        let response = self
            .post(
                "/api/v1/applications",
                serde_json::json!({ "address": address }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.body["id"]
            .as_str()
            .expect("id is a string")
            .to_string()
    }

    /// Poll the audit store until `count` events of `event_type` are written.
    ///
    /// Events go through a background writer, so they land shortly after the
    /// request returns.
    pub async fn wait_for_audit(&self, event_type: &str, count: i64) -> bool {
        let filter = AuditFilter::of_type(event_type);
        for _ in 0..50 {
            if self.audit_store.count(&filter).unwrap_or(0) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}

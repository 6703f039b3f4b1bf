//! Application storage trait and query types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Application, ApplicationStatus, CreateApplicationRequest};

/// Error type for application storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Application not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} application {application_id}: current status is {status}")]
    InvalidState {
        application_id: String,
        status: ApplicationStatus,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for listing applications.
#[derive(Debug, Clone)]
pub struct ApplicationFilter {
    /// Only applications in this status.
    pub status: Option<ApplicationStatus>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for ApplicationFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Selects applications stuck in a processing status.
#[derive(Debug, Clone)]
pub struct StalledFilter {
    /// Only rows last updated before this instant.
    pub cutoff: DateTime<Utc>,
    /// Attempt bound separating recoverable rows from exhausted ones.
    pub max_attempts: u32,
    /// Only rows with confirmed payment.
    pub require_payment: bool,
    /// When true, select rows with `attempts >= max_attempts` instead.
    pub exhausted: bool,
    pub limit: i64,
}

/// Trait for application storage backends.
///
/// Every mutating write goes through [`ApplicationStore::compare_and_swap`]
/// (or [`ApplicationStore::fail_active`]) and bumps `status_revision`.
pub trait ApplicationStore: Send + Sync {
    /// Insert a new `queued` application.
    fn create(&self, request: CreateApplicationRequest) -> Result<Application, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Application>, StoreError>;

    /// List applications matching the filter, newest first.
    fn list(&self, filter: &ApplicationFilter) -> Result<Vec<Application>, StoreError>;

    fn count(&self, filter: &ApplicationFilter) -> Result<i64, StoreError>;

    /// Number of applications per status. Statuses with no rows are omitted.
    fn count_by_status(&self) -> Result<HashMap<ApplicationStatus, i64>, StoreError>;

    /// Non-terminal applications with `next_run_at <= now`, oldest due first.
    fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Application>, StoreError>;

    /// Processing applications last touched before the filter's cutoff,
    /// oldest first.
    fn list_stalled(&self, filter: &StalledFilter) -> Result<Vec<Application>, StoreError>;

    /// Persist `application` if the stored revision still equals
    /// `expected_revision`.
    ///
    /// On success the stored row gets revision `expected_revision + 1` and a
    /// fresh `updated_at`; the stored row is returned. Returns `Ok(None)` when
    /// the revision moved or the row is gone. Phase content, flags and all
    /// mutable columns are written from `application`.
    fn compare_and_swap(
        &self,
        application: &Application,
        expected_revision: u64,
    ) -> Result<Option<Application>, StoreError> {
        self.compare_and_swap_at(application, expected_revision, Utc::now())
    }

    /// [`compare_and_swap`](Self::compare_and_swap) stamping `updated_at`
    /// with `now`, so callers can derive `next_run_at` from the same instant.
    fn compare_and_swap_at(
        &self,
        application: &Application,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError>;

    /// Move a non-terminal application to `error` with the given code,
    /// append `flag` and clear the lock, in a single write.
    ///
    /// Returns `Ok(None)` if the application is missing or already terminal.
    fn fail_active(
        &self,
        id: &str,
        code: &str,
        message: &str,
        flag: &str,
    ) -> Result<Option<Application>, StoreError>;
}

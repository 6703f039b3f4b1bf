//! Storage seam for the audit trail.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit database error: {0}")]
    Database(String),

    #[error("audit payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Which records `/audit` asks for. Unset fields match everything; the time
/// bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub application_id: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// Every record of one event type, e.g. `status_changed`.
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }
}

/// Window into the newest-first record list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditPage {
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditPage {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

pub trait AuditStore: Send + Sync {
    /// Persist one record and return its row id.
    fn append(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Matching records, newest first.
    fn page(&self, filter: &AuditFilter, page: AuditPage) -> Result<Vec<AuditRecord>, AuditError>;

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}

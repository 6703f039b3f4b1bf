//! Core application data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{AiAnalysis, DocumentRef, EnrichmentData, GeocodeResult, PhaseName};

/// Error code written when an application exhausts its API call budget.
pub const API_BUDGET_EXCEEDED: &str = "API_BUDGET_EXCEEDED";

/// Data flag appended alongside [`API_BUDGET_EXCEEDED`].
pub const BUDGET_EXCEEDED_FLAG: &str = "api_budget_exceeded";

/// Prefix of the data flag the sweeper leaves on recovered applications.
pub const RECOVERY_FLAG_PREFIX: &str = "auto_recovered_";

/// Error code for an application whose previous run died holding the lock.
pub const ORCHESTRATION_ABANDONED: &str = "ORCHESTRATION_ABANDONED";

// ============================================================================
// Status
// ============================================================================

/// Pipeline status of an application.
///
/// ```text
/// queued -> enriching -> ai -> rendering -> complete
///    \          \         \         \
///     +----------+---------+---------+---> error
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Queued,
    Enriching,
    Ai,
    Rendering,
    Complete,
    Error,
}

impl ApplicationStatus {
    /// All statuses, in pipeline order.
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Queued,
        ApplicationStatus::Enriching,
        ApplicationStatus::Ai,
        ApplicationStatus::Rendering,
        ApplicationStatus::Complete,
        ApplicationStatus::Error,
    ];

    /// Statuses in which a phase has been handed to a collaborator.
    pub const PROCESSING: [ApplicationStatus; 3] = [
        ApplicationStatus::Enriching,
        ApplicationStatus::Ai,
        ApplicationStatus::Rendering,
    ];

    /// Statuses that are still eligible for dispatch.
    pub const ACTIVE: [ApplicationStatus; 4] = [
        ApplicationStatus::Queued,
        ApplicationStatus::Enriching,
        ApplicationStatus::Ai,
        ApplicationStatus::Rendering,
    ];

    /// Returns the status as its storage string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Queued => "queued",
            ApplicationStatus::Enriching => "enriching",
            ApplicationStatus::Ai => "ai",
            ApplicationStatus::Rendering => "rendering",
            ApplicationStatus::Complete => "complete",
            ApplicationStatus::Error => "error",
        }
    }

    /// Whether no further automatic transitions occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationStatus::Complete | ApplicationStatus::Error)
    }

    /// Whether this is one of the in-flight processing statuses.
    pub fn is_processing(&self) -> bool {
        Self::PROCESSING.contains(self)
    }

    /// The phase that runs while the application sits in this status.
    pub fn phase(&self) -> Option<PhaseName> {
        match self {
            ApplicationStatus::Queued => Some(PhaseName::Geocode),
            ApplicationStatus::Enriching => Some(PhaseName::Enrich),
            ApplicationStatus::Ai => Some(PhaseName::Analyze),
            ApplicationStatus::Rendering => Some(PhaseName::Render),
            ApplicationStatus::Complete | ApplicationStatus::Error => None,
        }
    }

    /// The status reached when this status' phase succeeds.
    pub fn next(&self) -> Option<ApplicationStatus> {
        match self {
            ApplicationStatus::Queued => Some(ApplicationStatus::Enriching),
            ApplicationStatus::Enriching => Some(ApplicationStatus::Ai),
            ApplicationStatus::Ai => Some(ApplicationStatus::Rendering),
            ApplicationStatus::Rendering => Some(ApplicationStatus::Complete),
            ApplicationStatus::Complete | ApplicationStatus::Error => None,
        }
    }

    /// Progress shown to users for this status.
    pub fn progress_percent(&self) -> u8 {
        match self {
            ApplicationStatus::Queued => 5,
            ApplicationStatus::Enriching => 40,
            ApplicationStatus::Ai => 75,
            ApplicationStatus::Rendering => 90,
            ApplicationStatus::Complete => 100,
            ApplicationStatus::Error => 0,
        }
    }

    /// Short human-readable label for this status.
    pub fn stage_label(&self) -> &'static str {
        match self {
            ApplicationStatus::Queued => "Queued",
            ApplicationStatus::Enriching => "Gathering Data",
            ApplicationStatus::Ai => "AI Analysis",
            ApplicationStatus::Rendering => "Generating PDF",
            ApplicationStatus::Complete => "Complete",
            ApplicationStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Application
// ============================================================================

/// Results written by the pipeline phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode: Option<GeocodeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AiAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentRef>,
}

/// A feasibility application moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Raw property address supplied at intake.
    pub address: String,
    /// Whether payment for the report has been confirmed.
    pub payment_confirmed: bool,
    /// Current pipeline status.
    pub status: ApplicationStatus,
    /// Optimistic concurrency counter, bumped on every write.
    pub status_revision: u64,
    /// Pipeline attempts consumed so far.
    pub attempts: u32,
    /// Advisory lock; present while an orchestrator is working on the item.
    pub orchestration_lock_at: Option<DateTime<Utc>>,
    /// When the application becomes eligible for dispatch.
    pub next_run_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Degraded-data and recovery annotations, in insertion order.
    pub data_flags: Vec<String>,
    pub content: PhaseContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Append a data flag unless it is already present.
    pub fn add_flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.data_flags.contains(&flag) {
            self.data_flags.push(flag);
        }
    }

    /// Whether the advisory lock is held and younger than `ttl`.
    pub fn is_locked(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.orchestration_lock_at
            .is_some_and(|locked_at| now.signed_duration_since(locked_at) < ttl)
    }
}

/// Request to create a new application.
#[derive(Debug, Clone)]
pub struct CreateApplicationRequest {
    /// Raw property address.
    pub address: String,
    /// Whether payment has already been confirmed.
    pub payment_confirmed: bool,
}

impl CreateApplicationRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            payment_confirmed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_sequence() {
        let mut status = ApplicationStatus::Queued;
        let mut seen = vec![status];
        while let Some(next) = status.next() {
            status = next;
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                ApplicationStatus::Queued,
                ApplicationStatus::Enriching,
                ApplicationStatus::Ai,
                ApplicationStatus::Rendering,
                ApplicationStatus::Complete,
            ]
        );
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(ApplicationStatus::Queued.phase(), Some(PhaseName::Geocode));
        assert_eq!(ApplicationStatus::Enriching.phase(), Some(PhaseName::Enrich));
        assert_eq!(ApplicationStatus::Ai.phase(), Some(PhaseName::Analyze));
        assert_eq!(ApplicationStatus::Rendering.phase(), Some(PhaseName::Render));
        assert_eq!(ApplicationStatus::Complete.phase(), None);
        assert_eq!(ApplicationStatus::Error.phase(), None);
    }

    #[test]
    fn test_terminal_and_processing() {
        assert!(ApplicationStatus::Complete.is_terminal());
        assert!(ApplicationStatus::Error.is_terminal());
        assert!(!ApplicationStatus::Queued.is_terminal());
        assert!(!ApplicationStatus::Queued.is_processing());
        assert!(ApplicationStatus::Ai.is_processing());
        assert!(!ApplicationStatus::Error.is_processing());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>().unwrap(), status);
        }
        assert!("error_permanent".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ApplicationStatus::Rendering).unwrap();
        assert_eq!(json, "\"rendering\"");
    }

    #[test]
    fn test_add_flag_dedups() {
        let now = Utc::now();
        let mut app = Application {
            id: "a".to_string(),
            address: "1 Main St".to_string(),
            payment_confirmed: true,
            status: ApplicationStatus::Queued,
            status_revision: 0,
            attempts: 0,
            orchestration_lock_at: None,
            next_run_at: now,
            error_code: None,
            error_message: None,
            data_flags: vec![],
            content: PhaseContent::default(),
            created_at: now,
            updated_at: now,
        };
        app.add_flag("traffic_api_error");
        app.add_flag("traffic_api_error");
        assert_eq!(app.data_flags, vec!["traffic_api_error".to_string()]);
    }

    #[test]
    fn test_lock_ttl() {
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(5);
        let mut lock_holder = Application {
            id: "a".to_string(),
            address: String::new(),
            payment_confirmed: true,
            status: ApplicationStatus::Enriching,
            status_revision: 3,
            attempts: 0,
            orchestration_lock_at: Some(now - chrono::Duration::minutes(1)),
            next_run_at: now,
            error_code: None,
            error_message: None,
            data_flags: vec![],
            content: PhaseContent::default(),
            created_at: now,
            updated_at: now,
        };
        assert!(lock_holder.is_locked(now, ttl));

        lock_holder.orchestration_lock_at = Some(now - chrono::Duration::minutes(10));
        assert!(!lock_holder.is_locked(now, ttl));

        lock_holder.orchestration_lock_at = None;
        assert!(!lock_holder.is_locked(now, ttl));
    }
}

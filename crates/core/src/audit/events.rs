use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Application lifecycle
    ApplicationCreated {
        application_id: String,
        address: String,
        payment_confirmed: bool,
    },
    StatusChanged {
        application_id: String,
        from_status: String,
        to_status: String,
        revision: u64,
    },
    /// A retryable phase failure left the application waiting for backoff.
    RetryScheduled {
        application_id: String,
        status: String,
        attempts: u32,
        error_code: String,
        next_run_at: DateTime<Utc>,
    },
    ApplicationFailed {
        application_id: String,
        from_status: String,
        error_code: String,
        error_message: String,
        attempts: u32,
    },
    /// Operator reset of an application back to `queued`.
    ForceRetried {
        application_id: String,
        previous_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_error: Option<String>,
    },

    // Budget
    BudgetExceeded {
        application_id: String,
        call_count: u64,
        max: u64,
        window_hours: u32,
    },
    /// The call log could not be read; the listed applications were let through.
    BudgetFailOpen {
        application_ids: Vec<String>,
        error: String,
    },

    // Sweeper
    ApplicationRecovered {
        application_id: String,
        from_status: String,
        attempts: u32,
        flag: String,
    },
    RecoveryExhausted {
        application_id: String,
        status: String,
        attempts: u32,
    },

    // Batch runs
    DispatchCompleted {
        picked: usize,
        completed: usize,
        advanced: usize,
        failed: usize,
        duration_ms: u64,
    },
    SweepCompleted {
        recovered: usize,
        triggered: usize,
        failed: usize,
        skipped: usize,
        exhausted: usize,
    },
    RetentionPurged {
        cutoff: DateTime<Utc>,
        call_log_rows: usize,
        phase_metric_rows: usize,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ApplicationCreated { .. } => "application_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::ApplicationFailed { .. } => "application_failed",
            Self::ForceRetried { .. } => "force_retried",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::BudgetFailOpen { .. } => "budget_fail_open",
            Self::ApplicationRecovered { .. } => "application_recovered",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::DispatchCompleted { .. } => "dispatch_completed",
            Self::SweepCompleted { .. } => "sweep_completed",
            Self::RetentionPurged { .. } => "retention_purged",
        }
    }

    /// Extract application_id if this event concerns a single application
    pub fn application_id(&self) -> Option<&str> {
        match self {
            Self::ApplicationCreated { application_id, .. }
            | Self::StatusChanged { application_id, .. }
            | Self::RetryScheduled { application_id, .. }
            | Self::ApplicationFailed { application_id, .. }
            | Self::ForceRetried { application_id, .. }
            | Self::BudgetExceeded { application_id, .. }
            | Self::ApplicationRecovered { application_id, .. }
            | Self::RecoveryExhausted { application_id, .. } => Some(application_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub application_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.application_id(), None);
    }

    #[test]
    fn test_status_changed_carries_application_id() {
        let event = AuditEvent::StatusChanged {
            application_id: "app-1".to_string(),
            from_status: "queued".to_string(),
            to_status: "enriching".to_string(),
            revision: 2,
        };
        assert_eq!(event.event_type(), "status_changed");
        assert_eq!(event.application_id(), Some("app-1"));
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = AuditEvent::BudgetExceeded {
            application_id: "app-9".to_string(),
            call_count: 151,
            max: 150,
            window_hours: 24,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "budget_exceeded");
        assert_eq!(json["call_count"], 151);

        let parsed: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_force_retried_omits_missing_error() {
        let event = AuditEvent::ForceRetried {
            application_id: "app-2".to_string(),
            previous_status: "error".to_string(),
            previous_error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("previous_error"));
    }

    #[test]
    fn test_batch_events_have_no_application() {
        let event = AuditEvent::SweepCompleted {
            recovered: 1,
            triggered: 1,
            failed: 0,
            skipped: 0,
            exhausted: 2,
        };
        assert_eq!(event.event_type(), "sweep_completed");
        assert!(event.application_id().is_none());
    }
}

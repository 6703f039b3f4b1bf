//! Budget ledger: gates external spend per application.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::{ApiCallLog, BudgetConfig, BudgetError, BudgetStatus, CallLogError};
use crate::application::{ApplicationStore, API_BUDGET_EXCEEDED, BUDGET_EXCEEDED_FLAG};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

/// Answers "is this application within its API budget?" from the call log.
///
/// Counts are derived on every check; nothing is cached.
pub struct BudgetLedger {
    call_log: Arc<dyn ApiCallLog>,
    applications: Arc<dyn ApplicationStore>,
    config: BudgetConfig,
    audit: Option<AuditHandle>,
}

impl BudgetLedger {
    pub fn new(
        call_log: Arc<dyn ApiCallLog>,
        applications: Arc<dyn ApplicationStore>,
        config: BudgetConfig,
    ) -> Self {
        Self {
            call_log,
            applications,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Budget status for every id, from a single grouped count.
    pub fn check_budgets(&self, application_ids: &[String]) -> HashMap<String, BudgetStatus> {
        self.check_budgets_at(application_ids, Utc::now())
    }

    /// [`check_budgets`](Self::check_budgets) evaluated at `now`.
    pub fn check_budgets_at(
        &self,
        application_ids: &[String],
        now: DateTime<Utc>,
    ) -> HashMap<String, BudgetStatus> {
        let mut ids: Vec<String> = Vec::with_capacity(application_ids.len());
        for id in application_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }

        let since = now - Duration::hours(i64::from(self.config.window_hours));
        let max = self.config.max_calls;
        let window = self.config.window_hours;

        match self.call_log.count_since(&ids, since) {
            Ok(counts) => ids
                .into_iter()
                .map(|id| {
                    let count = counts.get(&id).copied().unwrap_or(0);
                    let status = BudgetStatus::counted(id.clone(), count, max, window);
                    let result = if status.within_budget { "within" } else { "exceeded" };
                    metrics::BUDGET_CHECKS.with_label_values(&[result]).inc();
                    (id, status)
                })
                .collect(),
            Err(e) => {
                self.fail_open(&ids, &e);
                ids.into_iter()
                    .map(|id| (id.clone(), BudgetStatus::failed_open(id, max, window)))
                    .collect()
            }
        }
    }

    /// Budget status for a single application.
    pub fn check_budget(&self, application_id: &str) -> BudgetStatus {
        let ids = [application_id.to_string()];
        self.check_budgets(&ids)
            .remove(application_id)
            .unwrap_or_else(|| {
                BudgetStatus::failed_open(
                    application_id.to_string(),
                    self.config.max_calls,
                    self.config.window_hours,
                )
            })
    }

    /// Check the budget and, when it is spent, move the application to
    /// `error` with [`API_BUDGET_EXCEEDED`].
    pub async fn enforce_budget(&self, application_id: &str) -> Result<BudgetStatus, BudgetError> {
        let status = self.check_budget(application_id);
        if status.within_budget {
            return Ok(status);
        }

        let message = format!(
            "{} API calls in the last {}h (max {})",
            status.call_count, status.window_hours, status.max
        );
        let failed = self.applications.fail_active(
            application_id,
            API_BUDGET_EXCEEDED,
            &message,
            BUDGET_EXCEEDED_FLAG,
        )?;

        warn!(
            application_id,
            call_count = status.call_count,
            max = status.max,
            marked_error = failed.is_some(),
            "API budget exceeded"
        );
        metrics::APPLICATIONS_FAILED
            .with_label_values(&[API_BUDGET_EXCEEDED])
            .inc();

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::BudgetExceeded {
                    application_id: application_id.to_string(),
                    call_count: status.call_count,
                    max: status.max,
                    window_hours: status.window_hours,
                })
                .await;
        }

        Err(BudgetError::Exceeded(status))
    }

    /// Append one call to the log. Failures are logged and swallowed.
    pub fn record_call(&self, application_id: &str, source: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        metrics::COLLABORATOR_CALLS
            .with_label_values(&[source, result])
            .inc();

        if let Err(e) = self
            .call_log
            .record(application_id, source, success, Utc::now())
        {
            warn!(application_id, source, error = %e, "Failed to record API call");
        } else {
            debug!(application_id, source, success, "Recorded API call");
        }
    }

    /// Drop call log entries older than `cutoff`.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CallLogError> {
        self.call_log.purge_before(cutoff)
    }

    fn fail_open(&self, ids: &[String], error: &CallLogError) {
        warn!(
            count = ids.len(),
            error = %error,
            "Budget check failed open: call log unavailable, allowing applications through"
        );
        metrics::BUDGET_FAIL_OPEN.inc();

        if let Some(ref audit) = self.audit {
            audit.try_emit(AuditEvent::BudgetFailOpen {
                application_ids: ids.to_vec(),
                error: error.to_string(),
            });
        }
    }
}

//! Application orchestrator implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::application::{
    Application, ApplicationStatus, ApplicationStore, ORCHESTRATION_ABANDONED,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::budget::{BudgetError, BudgetLedger};
use crate::metrics;
use crate::phase::{PhaseError, PhaseExecutor, PhaseOutput};

use super::config::OrchestratorConfig;
use super::types::{OrchestrationOutcome, OrchestratorError};

/// Drives applications through the phase state machine.
///
/// Every write is a compare-and-swap on `status_revision`, so concurrent
/// callers (dispatch workers, the sweeper, API triggers) never overwrite
/// each other; the loser observes [`OrchestrationOutcome::Conflict`].
pub struct Orchestrator {
    store: Arc<dyn ApplicationStore>,
    ledger: Arc<BudgetLedger>,
    executor: Arc<PhaseExecutor>,
    config: OrchestratorConfig,
    audit: Option<AuditHandle>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        ledger: Arc<BudgetLedger>,
        executor: Arc<PhaseExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            executor,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn executor(&self) -> &Arc<PhaseExecutor> {
        &self.executor
    }

    /// Retry delay after the given number of consumed attempts.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms);
        Duration::from_millis(delay)
    }

    /// Run at most one phase for the application.
    pub async fn orchestrate(
        &self,
        application_id: &str,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let outcome = self.orchestrate_inner(application_id).await?;
        metrics::ORCHESTRATIONS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }

    async fn orchestrate_inner(
        &self,
        application_id: &str,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let application = self
            .store
            .get(application_id)?
            .ok_or_else(|| OrchestratorError::NotFound(application_id.to_string()))?;

        let phase = match application.status.phase() {
            Some(phase) => phase,
            None => {
                debug!(application_id, status = %application.status, "Application is terminal");
                return Ok(OrchestrationOutcome::AlreadyTerminal {
                    status: application.status,
                });
            }
        };

        let now = Utc::now();
        let lock_ttl = chrono::Duration::seconds(self.config.lock_ttl_secs as i64);
        if application.is_locked(now, lock_ttl) {
            debug!(application_id, "Application is locked by another orchestrator");
            return Ok(OrchestrationOutcome::Locked);
        }

        // Acquire the advisory lock
        let mut lock_request = application.clone();
        lock_request.orchestration_lock_at = Some(now);
        if application.orchestration_lock_at.is_some() {
            // The previous run died holding the lock; it used up an attempt.
            lock_request.attempts = lock_request.attempts.saturating_add(1);
            warn!(
                application_id,
                status = %application.status,
                attempts = lock_request.attempts,
                "Taking over an expired orchestration lock"
            );
            if lock_request.attempts >= self.config.max_attempts {
                return self.abandon(&application, lock_request, now).await;
            }
        }
        let locked = match self
            .store
            .compare_and_swap_at(&lock_request, application.status_revision, now)?
        {
            Some(locked) => locked,
            None => {
                debug!(application_id, "Lost the race for the advisory lock");
                return Ok(OrchestrationOutcome::Conflict);
            }
        };

        match self.ledger.enforce_budget(application_id).await {
            Ok(_) => {}
            Err(BudgetError::Exceeded(status)) => {
                return Ok(OrchestrationOutcome::BudgetExceeded {
                    call_count: status.call_count,
                    max: status.max,
                });
            }
            Err(BudgetError::Store(e)) => {
                self.release_lock(&locked);
                return Err(e.into());
            }
        }

        info!(
            application_id,
            status = %locked.status,
            %phase,
            revision = locked.status_revision,
            attempts = locked.attempts,
            "Orchestrating application"
        );

        let result = self.executor.execute(&locked, phase).await;
        let from = locked.status;
        let finished_at = Utc::now();
        let (next, outcome) = match result {
            Ok(output) => self.advance(&locked, output, finished_at),
            Err(error) => self.fail(&locked, error, finished_at),
        };

        let saved = match self
            .store
            .compare_and_swap_at(&next, locked.status_revision, finished_at)?
        {
            Some(saved) => saved,
            None => {
                warn!(
                    application_id,
                    revision = locked.status_revision,
                    "Application changed while the phase was running, discarding result"
                );
                return Ok(OrchestrationOutcome::Conflict);
            }
        };

        self.record_outcome(&saved, from, &outcome).await;
        Ok(outcome)
    }

    /// Move an application whose runs keep dying mid-phase to `error`.
    async fn abandon(
        &self,
        application: &Application,
        mut next: Application,
        now: DateTime<Utc>,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let from = application.status;
        next.status = ApplicationStatus::Error;
        next.orchestration_lock_at = None;
        next.error_code = Some(ORCHESTRATION_ABANDONED.to_string());
        next.error_message = Some(format!(
            "Orchestration of {} phase was abandoned {} times",
            from, next.attempts
        ));

        let Some(saved) = self
            .store
            .compare_and_swap_at(&next, application.status_revision, now)?
        else {
            return Ok(OrchestrationOutcome::Conflict);
        };

        let outcome = OrchestrationOutcome::Failed {
            from,
            error_code: ORCHESTRATION_ABANDONED.to_string(),
            attempts: saved.attempts,
        };
        self.record_outcome(&saved, from, &outcome).await;
        Ok(outcome)
    }

    fn advance(
        &self,
        application: &Application,
        output: PhaseOutput,
        now: DateTime<Utc>,
    ) -> (Application, OrchestrationOutcome) {
        let from = application.status;
        let to = from.next().unwrap_or(ApplicationStatus::Complete);

        let mut next = application.clone();
        output.apply_to(&mut next.content);
        for flag in output.data_flags {
            next.add_flag(flag);
        }
        next.status = to;
        next.error_code = None;
        next.error_message = None;
        next.orchestration_lock_at = None;
        next.next_run_at = now;

        (next, OrchestrationOutcome::Advanced { from, to })
    }

    fn fail(
        &self,
        application: &Application,
        error: PhaseError,
        now: DateTime<Utc>,
    ) -> (Application, OrchestrationOutcome) {
        let from = application.status;
        let mut next = application.clone();
        next.orchestration_lock_at = None;
        next.error_code = Some(error.code().to_string());
        next.error_message = Some(error.message().to_string());

        if error.is_retryable() {
            next.attempts = next.attempts.saturating_add(1);
            if next.attempts < self.config.max_attempts {
                let delay = self.backoff(next.attempts);
                next.next_run_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                let outcome = OrchestrationOutcome::RetryScheduled {
                    status: from,
                    attempts: next.attempts,
                    error_code: error.code().to_string(),
                    next_run_at: next.next_run_at,
                };
                return (next, outcome);
            }
        }

        next.status = ApplicationStatus::Error;
        let outcome = OrchestrationOutcome::Failed {
            from,
            error_code: error.code().to_string(),
            attempts: next.attempts,
        };
        (next, outcome)
    }

    async fn record_outcome(
        &self,
        saved: &Application,
        from: ApplicationStatus,
        outcome: &OrchestrationOutcome,
    ) {
        match outcome {
            OrchestrationOutcome::Advanced { to, .. } => {
                info!(
                    application_id = %saved.id,
                    from = %from,
                    to = %to,
                    revision = saved.status_revision,
                    "Application advanced"
                );
                metrics::STATUS_TRANSITIONS
                    .with_label_values(&[from.as_str(), to.as_str()])
                    .inc();
                if *to == ApplicationStatus::Complete {
                    metrics::APPLICATIONS_COMPLETED.inc();
                }
                self.emit(AuditEvent::StatusChanged {
                    application_id: saved.id.clone(),
                    from_status: from.to_string(),
                    to_status: to.to_string(),
                    revision: saved.status_revision,
                })
                .await;
            }
            OrchestrationOutcome::RetryScheduled {
                attempts,
                error_code,
                next_run_at,
                ..
            } => {
                warn!(
                    application_id = %saved.id,
                    status = %from,
                    attempts,
                    error_code = %error_code,
                    next_run_at = %next_run_at,
                    "Phase failed, retry scheduled"
                );
                self.emit(AuditEvent::RetryScheduled {
                    application_id: saved.id.clone(),
                    status: from.to_string(),
                    attempts: *attempts,
                    error_code: error_code.clone(),
                    next_run_at: *next_run_at,
                })
                .await;
            }
            OrchestrationOutcome::Failed {
                error_code,
                attempts,
                ..
            } => {
                warn!(
                    application_id = %saved.id,
                    from = %from,
                    attempts,
                    error_code = %error_code,
                    "Application failed"
                );
                metrics::STATUS_TRANSITIONS
                    .with_label_values(&[from.as_str(), ApplicationStatus::Error.as_str()])
                    .inc();
                metrics::APPLICATIONS_FAILED
                    .with_label_values(&[error_code.as_str()])
                    .inc();
                self.emit(AuditEvent::ApplicationFailed {
                    application_id: saved.id.clone(),
                    from_status: from.to_string(),
                    error_code: error_code.clone(),
                    error_message: saved.error_message.clone().unwrap_or_default(),
                    attempts: *attempts,
                })
                .await;
            }
            _ => {}
        }
    }

    /// Best-effort lock release after an infrastructure error.
    fn release_lock(&self, locked: &Application) {
        let mut unlocked = locked.clone();
        unlocked.orchestration_lock_at = None;
        match self.store.compare_and_swap(&unlocked, locked.status_revision) {
            Ok(Some(_)) => {}
            Ok(None) => debug!(application_id = %locked.id, "Lock already released"),
            Err(e) => warn!(application_id = %locked.id, error = %e, "Failed to release lock"),
        }
    }

    /// Operator reset: back to `queued` with a fresh attempt budget.
    ///
    /// Complete applications are rejected.
    pub async fn force_retry(&self, application_id: &str) -> Result<Application, OrchestratorError> {
        let application = self
            .store
            .get(application_id)?
            .ok_or_else(|| OrchestratorError::NotFound(application_id.to_string()))?;

        if application.status == ApplicationStatus::Complete {
            return Err(OrchestratorError::InvalidState {
                application_id: application_id.to_string(),
                status: application.status,
                operation: "retry".to_string(),
            });
        }

        let mut next = application.clone();
        next.status = ApplicationStatus::Queued;
        next.attempts = 0;
        next.error_code = None;
        next.error_message = None;
        next.orchestration_lock_at = None;
        let now = Utc::now();
        next.next_run_at = now;

        let saved = self
            .store
            .compare_and_swap_at(&next, application.status_revision, now)?
            .ok_or_else(|| OrchestratorError::Conflict(application_id.to_string()))?;

        info!(
            application_id,
            previous_status = %application.status,
            revision = saved.status_revision,
            "Application force-retried"
        );
        self.emit(AuditEvent::ForceRetried {
            application_id: application_id.to_string(),
            previous_status: application.status.to_string(),
            previous_error: application.error_code.clone(),
        })
        .await;

        Ok(saved)
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

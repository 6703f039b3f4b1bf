//! Stalled-job sweeper implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::application::{
    Application, ApplicationFilter, ApplicationStatus, ApplicationStore, StalledFilter,
    API_BUDGET_EXCEEDED, RECOVERY_FLAG_PREFIX,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::dispatch::join_error_message;
use crate::metrics;
use crate::orchestrator::Orchestrator;

use super::config::SweeperConfig;
use super::types::{RecoverErrorsReport, SweepError, SweepReport};

/// Recovers applications that stopped making progress.
///
/// The sweeper only touches `status`, `attempts`, the lock, `next_run_at`
/// and recovery flags; phase content is left alone.
pub struct StalledJobSweeper {
    orchestrator: Arc<Orchestrator>,
    config: SweeperConfig,
    audit: Option<AuditHandle>,
}

impl StalledJobSweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, config: SweeperConfig) -> Self {
        Self {
            orchestrator,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    ///
    /// The attempt cap is the orchestrator's, so recovery never pushes a
    /// processing application past it.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let store = self.orchestrator.store();
        let filter = StalledFilter {
            cutoff: now - chrono::Duration::minutes(self.config.stall_threshold_minutes as i64),
            max_attempts: self.orchestrator.config().max_attempts,
            require_payment: self.config.require_payment,
            exhausted: false,
            limit: self.config.batch_size as i64,
        };
        let stalled = store.list_stalled(&filter)?;
        let exhausted = store.list_stalled(&StalledFilter {
            exhausted: true,
            ..filter
        })?;

        let mut report = SweepReport::default();
        let flag = recovery_flag(now);

        for application in stalled {
            let id = application.id.clone();
            let next = recovered(&application, &flag, now);

            match store.compare_and_swap_at(&next, application.status_revision, now) {
                Ok(Some(saved)) => {
                    info!(
                        application_id = %id,
                        from = %application.status,
                        attempts = saved.attempts,
                        "Recovered stalled application"
                    );
                    self.emit(AuditEvent::ApplicationRecovered {
                        application_id: id.clone(),
                        from_status: application.status.to_string(),
                        attempts: saved.attempts,
                        flag: flag.clone(),
                    })
                    .await;
                    report.recovered.push(id.clone());

                    let orchestrator = Arc::clone(&self.orchestrator);
                    let task_id = id.clone();
                    let retrigger =
                        tokio::spawn(async move { orchestrator.orchestrate(&task_id).await });
                    match retrigger.await {
                        Ok(Ok(outcome)) => {
                            debug!(application_id = %id, outcome = outcome.label(), "Re-triggered recovered application");
                            report.triggered.push(id);
                        }
                        Ok(Err(e)) => {
                            warn!(application_id = %id, error = %e, "Failed to re-trigger recovered application");
                            report.failed.push(id);
                        }
                        Err(e) => {
                            let message = join_error_message(e);
                            error!(application_id = %id, error = %message, "Re-trigger of recovered application aborted");
                            report.failed.push(id);
                        }
                    }
                }
                Ok(None) => {
                    debug!(application_id = %id, "Application changed during sweep, skipping");
                    report.skipped.push(id);
                }
                Err(e) => {
                    warn!(application_id = %id, error = %e, "Failed to recover stalled application");
                    report.failed.push(id);
                }
            }
        }

        for application in exhausted {
            warn!(
                application_id = %application.id,
                status = %application.status,
                attempts = application.attempts,
                "Stalled application has no attempts left, manual intervention required"
            );
            self.emit(AuditEvent::RecoveryExhausted {
                application_id: application.id.clone(),
                status: application.status.to_string(),
                attempts: application.attempts,
            })
            .await;
            report.exhausted.push(application.id);
        }

        for (label, ids) in [
            ("recovered", &report.recovered),
            ("triggered", &report.triggered),
            ("failed", &report.failed),
            ("skipped", &report.skipped),
            ("exhausted", &report.exhausted),
        ] {
            metrics::SWEEP_RESULTS
                .with_label_values(&[label])
                .inc_by(ids.len() as u64);
        }

        info!(
            recovered = report.recovered.len(),
            triggered = report.triggered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            exhausted = report.exhausted.len(),
            "Sweep completed"
        );
        self.emit(AuditEvent::SweepCompleted {
            recovered: report.recovered.len(),
            triggered: report.triggered.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
            exhausted: report.exhausted.len(),
        })
        .await;

        Ok(report)
    }

    /// Force-retry up to `limit` applications in `error`.
    ///
    /// Applications stopped by the API budget are skipped. With `dry_run`
    /// nothing is written and `retried` lists the eligible ids.
    pub async fn recover_errors(
        &self,
        limit: usize,
        dry_run: bool,
    ) -> Result<RecoverErrorsReport, SweepError> {
        let errored = self.orchestrator.store().list(
            &ApplicationFilter::new()
                .with_status(ApplicationStatus::Error)
                .with_limit(limit as i64),
        )?;

        let mut report = RecoverErrorsReport {
            dry_run,
            ..Default::default()
        };

        for application in errored {
            if application.error_code.as_deref() == Some(API_BUDGET_EXCEEDED) {
                report.skipped.push(application.id);
                continue;
            }
            if dry_run {
                report.retried.push(application.id);
                continue;
            }
            match self.orchestrator.force_retry(&application.id).await {
                Ok(_) => report.retried.push(application.id),
                Err(e) => {
                    warn!(application_id = %application.id, error = %e, "Failed to retry errored application");
                    report.failed.push(application.id);
                }
            }
        }

        info!(
            dry_run,
            retried = report.retried.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Error recovery completed"
        );
        Ok(report)
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

fn recovery_flag(now: DateTime<Utc>) -> String {
    format!("{}{}", RECOVERY_FLAG_PREFIX, now.format("%Y-%m-%d"))
}

fn recovered(application: &Application, flag: &str, now: DateTime<Utc>) -> Application {
    let mut next = application.clone();
    next.status = ApplicationStatus::Queued;
    next.attempts = next.attempts.saturating_add(1);
    next.orchestration_lock_at = None;
    next.next_run_at = now;
    next.data_flags
        .retain(|existing| !existing.starts_with(RECOVERY_FLAG_PREFIX));
    next.add_flag(flag);
    next
}

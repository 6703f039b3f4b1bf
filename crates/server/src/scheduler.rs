//! Periodic background jobs: dispatch runs, stall sweeps and retention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use feasibility_core::{
    audit::{AuditEvent, AuditHandle},
    config::{RetentionConfig, SchedulerConfig},
    phase::PhaseMetricStore,
    BudgetLedger, DispatchPool, StalledJobSweeper,
};

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetentionReport {
    pub cutoff: DateTime<Utc>,
    pub call_log_rows: usize,
    pub phase_metric_rows: usize,
}

/// Snapshot of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub dispatch_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub retention_interval_secs: u64,
}

/// Purges rows older than the retention window.
struct Retention {
    config: RetentionConfig,
    ledger: Arc<BudgetLedger>,
    metric_store: Arc<dyn PhaseMetricStore>,
    audit: Option<AuditHandle>,
}

impl Retention {
    fn run(&self, now: DateTime<Utc>) -> RetentionReport {
        let cutoff = now - chrono::Duration::days(self.config.retention_days as i64);

        let call_log_rows = self.ledger.purge_before(cutoff).unwrap_or_else(|e| {
            error!(error = %e, "Failed to purge API call log");
            0
        });
        let phase_metric_rows = self.metric_store.purge_before(cutoff).unwrap_or_else(|e| {
            error!(error = %e, "Failed to purge phase metrics");
            0
        });

        info!(%cutoff, call_log_rows, phase_metric_rows, "Retention pass finished");

        if let Some(ref audit) = self.audit {
            audit.try_emit(AuditEvent::RetentionPurged {
                cutoff,
                call_log_rows,
                phase_metric_rows,
            });
        }

        RetentionReport {
            cutoff,
            call_log_rows,
            phase_metric_rows,
        }
    }
}

/// Drives the dispatch pool, the sweeper and retention on fixed intervals.
pub struct Scheduler {
    config: SchedulerConfig,
    dispatch: Arc<DispatchPool>,
    sweeper: Arc<StalledJobSweeper>,
    retention: Arc<Retention>,

    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        retention: RetentionConfig,
        dispatch: Arc<DispatchPool>,
        sweeper: Arc<StalledJobSweeper>,
        ledger: Arc<BudgetLedger>,
        metric_store: Arc<dyn PhaseMetricStore>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            dispatch,
            sweeper,
            retention: Arc::new(Retention {
                config: retention,
                ledger,
                metric_store,
                audit,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            dispatch_interval_secs: self.config.dispatch_interval_secs,
            sweep_interval_secs: self.config.sweep_interval_secs,
            retention_interval_secs: self.config.retention_interval_secs,
        }
    }

    /// Spawn the background loops. Does nothing when disabled or already running.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Scheduler disabled in config");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        self.spawn_dispatch_loop();
        self.spawn_sweep_loop();
        self.spawn_retention_loop();

        info!(
            dispatch_secs = self.config.dispatch_interval_secs,
            sweep_secs = self.config.sweep_interval_secs,
            retention_secs = self.config.retention_interval_secs,
            "Scheduler started"
        );
    }

    /// Signal every loop to stop after its current run.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        info!("Scheduler stopped");
    }

    /// Delete call log entries and phase metrics older than the retention window.
    pub fn run_retention(&self, now: DateTime<Utc>) -> RetentionReport {
        self.retention.run(now)
    }

    fn spawn_dispatch_loop(&self) {
        let running = Arc::clone(&self.running);
        let dispatch = Arc::clone(&self.dispatch);
        let interval = Duration::from_secs(self.config.dispatch_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match dispatch.run_once().await {
                            Ok(report) if report.picked > 0 => debug!(
                                picked = report.picked,
                                advanced = report.advanced,
                                failed = report.failed,
                                "Scheduled dispatch finished"
                            ),
                            Ok(_) => {}
                            Err(e) => warn!("Dispatch error: {}", e),
                        }
                    }
                }
            }
            info!("Dispatch loop stopped");
        });
    }

    fn spawn_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let sweeper = Arc::clone(&self.sweeper);
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = sweeper.sweep().await {
                            warn!("Sweep error: {}", e);
                        }
                    }
                }
            }
            info!("Sweep loop stopped");
        });
    }

    fn spawn_retention_loop(&self) {
        let running = Arc::clone(&self.running);
        let interval = Duration::from_secs(self.config.retention_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let retention = Arc::clone(&self.retention);

        tokio::spawn(async move {
            info!("Retention loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Retention loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        retention.run(Utc::now());
                    }
                }
            }
            info!("Retention loop stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feasibility_core::{
        budget::ApiCallLog, phase::PhaseName, testing::TestPipeline, DispatchConfig,
        SweeperConfig,
    };

    fn scheduler(pipeline: &TestPipeline, config: SchedulerConfig) -> Scheduler {
        let orchestrator = pipeline.orchestrator.clone();
        Scheduler::new(
            config,
            RetentionConfig::default(),
            Arc::new(DispatchPool::new(orchestrator.clone(), DispatchConfig::default())),
            Arc::new(StalledJobSweeper::new(orchestrator, SweeperConfig::default())),
            pipeline.ledger.clone(),
            pipeline.metric_store.clone(),
            None,
        )
    }

    #[test]
    fn test_retention_purges_only_expired_rows() {
        let pipeline = TestPipeline::new();
        let app = pipeline.create("12 Archive Row");
        let now = Utc::now();
        let old = now - chrono::Duration::days(45);

        pipeline.call_log.record(&app.id, "census", true, old).unwrap();
        pipeline.call_log.record(&app.id, "census", true, now).unwrap();
        pipeline
            .metric_store
            .open(&app.id, PhaseName::Geocode, old)
            .unwrap();

        let report = scheduler(&pipeline, SchedulerConfig::default()).run_retention(now);
        assert_eq!(report.call_log_rows, 1);
        assert_eq!(report.phase_metric_rows, 1);
        assert_eq!(report.cutoff, now - chrono::Duration::days(30));

        let remaining = pipeline
            .call_log
            .count_since(&[app.id.clone()], old - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(remaining.get(&app.id).copied(), Some(1));
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_not_start() {
        let pipeline = TestPipeline::new();
        let config = SchedulerConfig {
            enabled: false,
            ..Default::default()
        };
        let scheduler = scheduler(&pipeline, config);

        scheduler.start();
        assert!(!scheduler.is_running());
        assert!(!scheduler.status().enabled);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let pipeline = TestPipeline::new();
        let scheduler = scheduler(&pipeline, SchedulerConfig::default());

        scheduler.start();
        assert!(scheduler.status().running);

        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}

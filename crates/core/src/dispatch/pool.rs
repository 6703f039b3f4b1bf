//! Bounded worker pool over the due-application list.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::ApplicationStore;
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::orchestrator::Orchestrator;

use super::config::DispatchConfig;
use super::types::{DispatchError, DispatchOutcome, DispatchReport, DispatchResult};

/// Picks due applications and runs one orchestration step for each.
///
/// Each run drains a shared queue with `concurrency` workers. Every
/// orchestration runs in its own task, so a panic only fails that item.
pub struct DispatchPool {
    orchestrator: Arc<Orchestrator>,
    config: DispatchConfig,
    audit: Option<AuditHandle>,
}

impl DispatchPool {
    pub fn new(orchestrator: Arc<Orchestrator>, config: DispatchConfig) -> Self {
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

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();
        metrics::DISPATCH_RUNS.inc();

        let due = self
            .orchestrator
            .store()
            .list_due(Utc::now(), self.config.batch_size as i64)?;

        let mut seen = HashSet::new();
        let queue: VecDeque<(usize, String)> = due
            .into_iter()
            .map(|app| app.id)
            .filter(|id| seen.insert(id.clone()))
            .enumerate()
            .collect();

        if queue.is_empty() {
            debug!("No applications due for dispatch");
            return Ok(DispatchReport::default());
        }

        let picked = queue.len();
        let workers = self.config.concurrency.clamp(1, picked);
        debug!(picked, workers, "Dispatching due applications");

        let queue = Arc::new(Mutex::new(queue));
        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let orchestrator = Arc::clone(&self.orchestrator);
            join_set.spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = queue.lock().unwrap().pop_front();
                    let Some((index, application_id)) = next else {
                        break;
                    };
                    let outcome = run_item(Arc::clone(&orchestrator), application_id).await;
                    results.push((index, outcome));
                }
                results
            });
        }

        let mut indexed = Vec::with_capacity(picked);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(results) => indexed.extend(results),
                Err(e) => error!(error = %e, "Dispatch worker terminated"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<DispatchOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        let report =
            DispatchReport::from_outcomes(outcomes, started.elapsed().as_millis() as u64);
        info!(
            picked = report.picked,
            completed = report.completed,
            advanced = report.advanced,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Dispatch run completed"
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::DispatchCompleted {
                    picked: report.picked,
                    completed: report.completed,
                    advanced: report.advanced,
                    failed: report.failed,
                    duration_ms: report.duration_ms,
                })
                .await;
        }

        Ok(report)
    }
}

async fn run_item(orchestrator: Arc<Orchestrator>, application_id: String) -> DispatchOutcome {
    let id = application_id.clone();
    let handle = tokio::spawn(async move { orchestrator.orchestrate(&id).await });

    let result = match handle.await {
        Ok(Ok(outcome)) => DispatchResult::Completed { outcome },
        Ok(Err(e)) => {
            warn!(application_id = %application_id, error = %e, "Orchestration failed");
            DispatchResult::Error {
                message: e.to_string(),
            }
        }
        Err(e) => {
            let message = join_error_message(e);
            error!(application_id = %application_id, error = %message, "Orchestration task aborted");
            DispatchResult::Panicked { message }
        }
    };

    metrics::DISPATCH_ITEMS
        .with_label_values(&[result.label()])
        .inc();

    DispatchOutcome {
        application_id,
        result,
    }
}

pub(crate) fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ApplicationStatus;
    use crate::orchestrator::OrchestrationOutcome;
    use crate::testing::TestPipeline;

    fn pool(pipeline: &TestPipeline, config: DispatchConfig) -> DispatchPool {
        DispatchPool::new(pipeline.orchestrator.clone(), config)
    }

    #[tokio::test]
    async fn test_empty_run() {
        let pipeline = TestPipeline::new();
        let report = pool(&pipeline, DispatchConfig::default())
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.picked, 0);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_runs_one_phase_per_item() {
        let pipeline = TestPipeline::new();
        let ids: Vec<String> = (0..5)
            .map(|i| pipeline.create(&format!("{} Main Street", i)).id)
            .collect();

        let report = pool(&pipeline, DispatchConfig::default())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.picked, 5);
        assert_eq!(report.completed, 5);
        assert_eq!(report.advanced, 5);
        assert_eq!(report.failed, 0);
        for id in &ids {
            assert_eq!(pipeline.get(id).status, ApplicationStatus::Enriching);
        }
        assert_eq!(pipeline.mocks.geocoder.call_count(), 5);
    }

    #[tokio::test]
    async fn test_batch_size_limits_pick() {
        let pipeline = TestPipeline::new();
        for i in 0..4 {
            pipeline.create(&format!("{} Elm Street", i));
        }

        let report = pool(
            &pipeline,
            DispatchConfig {
                batch_size: 3,
                concurrency: 2,
            },
        )
        .run_once()
        .await
        .unwrap();
        assert_eq!(report.picked, 3);
    }

    #[tokio::test]
    async fn test_backoff_hides_item_until_due() {
        let pipeline = TestPipeline::new();
        let app = pipeline.create("7 Retry Row");
        pipeline
            .mocks
            .geocoder
            .fail_next(crate::phase::CollaboratorError::Timeout);

        let dispatch = pool(&pipeline, DispatchConfig::default());
        let first = dispatch.run_once().await.unwrap();
        assert!(matches!(
            first.outcomes[0].result,
            DispatchResult::Completed {
                outcome: OrchestrationOutcome::RetryScheduled { .. }
            }
        ));

        let second = dispatch.run_once().await.unwrap();
        assert_eq!(second.picked, 0);
        assert_eq!(pipeline.get(&app.id).status, ApplicationStatus::Queued);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pipeline = TestPipeline::new();
        let doomed = pipeline.create("13 Panic Lane");
        let healthy = pipeline.create("1 Calm Court");
        pipeline.place_in(&healthy.id, ApplicationStatus::Enriching);
        pipeline.mocks.geocoder.panic_with("geocoder exploded");

        let report = pool(&pipeline, DispatchConfig::default())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.picked, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.advanced, 1);
        assert_eq!(report.failed, 1);

        let doomed_outcome = report
            .outcomes
            .iter()
            .find(|o| o.application_id == doomed.id)
            .unwrap();
        assert_eq!(
            doomed_outcome.result,
            DispatchResult::Panicked {
                message: "geocoder exploded".to_string()
            }
        );
        assert_eq!(pipeline.get(&healthy.id).status, ApplicationStatus::Ai);
    }
}

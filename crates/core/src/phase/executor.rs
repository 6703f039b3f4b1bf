//! Runs one pipeline phase for one application.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::config::PhaseConfig;
use super::metric_store::PhaseMetricStore;
use super::traits::{CollaboratorError, Collaborators};
use super::types::{
    EnrichmentData, EnrichmentRequest, PhaseContext, PhaseError, PhaseName, PhaseOutput,
    PhaseProduct, MISSING_COORDINATES,
};
use crate::application::Application;
use crate::budget::BudgetLedger;
use crate::metrics;

/// Invokes the collaborator for a phase and records what happened.
///
/// The executor never decides status transitions; it hands a
/// [`PhaseOutput`] or a classified [`PhaseError`] back to the caller.
pub struct PhaseExecutor {
    collaborators: Collaborators,
    ledger: Arc<BudgetLedger>,
    metric_store: Arc<dyn PhaseMetricStore>,
    config: PhaseConfig,
}

impl PhaseExecutor {
    pub fn new(
        collaborators: Collaborators,
        ledger: Arc<BudgetLedger>,
        metric_store: Arc<dyn PhaseMetricStore>,
        config: PhaseConfig,
    ) -> Self {
        Self {
            collaborators,
            ledger,
            metric_store,
            config,
        }
    }

    pub fn metric_store(&self) -> &Arc<dyn PhaseMetricStore> {
        &self.metric_store
    }

    pub async fn execute(
        &self,
        application: &Application,
        phase: PhaseName,
    ) -> Result<PhaseOutput, PhaseError> {
        let record_id = match self.metric_store.open(&application.id, phase, Utc::now()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(application_id = %application.id, %phase, error = %e, "Failed to open phase metric record");
                None
            }
        };

        debug!(application_id = %application.id, %phase, "Running phase");
        let started = Instant::now();
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.phase_timeout_secs);

        let result = match phase {
            PhaseName::Geocode => self.geocode(application, deadline).await,
            PhaseName::Enrich => self.enrich(application, deadline).await,
            PhaseName::Analyze => self.analyze(application, deadline).await,
            PhaseName::Render => self.render(application, deadline).await,
        };

        let elapsed = started.elapsed();
        metrics::PHASE_DURATION
            .with_label_values(&[phase.as_str()])
            .observe(elapsed.as_secs_f64());
        let label = match &result {
            Ok(_) => "success",
            Err(PhaseError::Retryable { .. }) => "retryable",
            Err(PhaseError::Fatal { .. }) => "fatal",
        };
        metrics::PHASE_EXECUTIONS
            .with_label_values(&[phase.as_str(), label])
            .inc();

        if let Some(id) = record_id {
            let error_message = result.as_ref().err().map(|e| e.to_string());
            if let Err(e) =
                self.metric_store
                    .close(id, Utc::now(), result.is_ok(), error_message.as_deref())
            {
                warn!(application_id = %application.id, %phase, error = %e, "Failed to close phase metric record");
            }
        }

        match &result {
            Ok(output) => info!(
                application_id = %application.id,
                %phase,
                duration_ms = elapsed.as_millis() as u64,
                flags = output.data_flags.len(),
                "Phase succeeded"
            ),
            Err(e) => warn!(
                application_id = %application.id,
                %phase,
                duration_ms = elapsed.as_millis() as u64,
                code = e.code(),
                retryable = e.is_retryable(),
                "Phase failed: {}",
                e.message()
            ),
        }

        result
    }

    /// Run one collaborator call, cut off at the phase deadline, and log it.
    ///
    /// A call that would start after the deadline is never made and not
    /// logged.
    async fn call<T, F>(
        &self,
        application_id: &str,
        source: &str,
        fut: F,
        deadline: tokio::time::Instant,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        if tokio::time::Instant::now() >= deadline {
            return Err(CollaboratorError::Timeout);
        }
        let outcome = match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout),
        };
        self.ledger.record_call(application_id, source, outcome.is_ok());
        outcome
    }

    async fn geocode(
        &self,
        application: &Application,
        deadline: tokio::time::Instant,
    ) -> Result<PhaseOutput, PhaseError> {
        let geocoder = &self.collaborators.geocoder;
        let result = self
            .call(
                &application.id,
                geocoder.name(),
                geocoder.geocode(&application.address),
                deadline,
            )
            .await
            .map_err(|e| classify(geocoder.name(), e))?;

        Ok(PhaseOutput::new(
            PhaseName::Geocode,
            PhaseProduct::Geocode(result),
        ))
    }

    async fn enrich(
        &self,
        application: &Application,
        deadline: tokio::time::Instant,
    ) -> Result<PhaseOutput, PhaseError> {
        let Some(ref geocode) = application.content.geocode else {
            return Err(PhaseError::fatal(
                MISSING_COORDINATES,
                "Missing coordinates: geocoding did not write a location",
            ));
        };

        let request = EnrichmentRequest {
            application_id: application.id.clone(),
            address: application.address.clone(),
            lat: geocode.lat,
            lng: geocode.lng,
        };
        let request = &request;

        let calls: Vec<BoxFuture<'_, _>> = self
            .collaborators
            .providers
            .iter()
            .enumerate()
            .map(|(index, provider)| {
                async move {
                    let name = provider.name().to_string();
                    let result = self
                        .call(&request.application_id, &name, provider.enrich(request), deadline)
                        .await;
                    (index, name, result)
                }
                .boxed()
            })
            .collect();
        let mut results: Vec<_> = stream::iter(calls)
            .buffer_unordered(self.config.max_parallel_providers.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut data = EnrichmentData::default();
        let mut flags = Vec::new();
        for (_, name, result) in results {
            match result {
                Ok(payload) => {
                    data.providers.insert(name, payload);
                }
                Err(e) => {
                    warn!(application_id = %application.id, provider = %name, error = %e, "Enrichment provider failed");
                    flags.push(format!("{}_api_error", name));
                }
            }
        }

        let mut output = PhaseOutput::new(PhaseName::Enrich, PhaseProduct::Enrichment(data));
        output.data_flags = flags;
        Ok(output)
    }

    async fn analyze(
        &self,
        application: &Application,
        deadline: tokio::time::Instant,
    ) -> Result<PhaseOutput, PhaseError> {
        let engine = &self.collaborators.ai_engine;
        let context = PhaseContext::from_application(application);
        let analysis = self
            .call(&application.id, engine.name(), engine.analyze(&context), deadline)
            .await
            .map_err(|e| classify(engine.name(), e))?;

        Ok(PhaseOutput::new(
            PhaseName::Analyze,
            PhaseProduct::Analysis(analysis),
        ))
    }

    async fn render(
        &self,
        application: &Application,
        deadline: tokio::time::Instant,
    ) -> Result<PhaseOutput, PhaseError> {
        let renderer = &self.collaborators.renderer;
        let context = PhaseContext::from_application(application);
        let document = self
            .call(&application.id, renderer.name(), renderer.render(&context), deadline)
            .await
            .map_err(|e| classify(renderer.name(), e))?;

        Ok(PhaseOutput::new(
            PhaseName::Render,
            PhaseProduct::Document(document),
        ))
    }
}

fn classify(source: &str, error: CollaboratorError) -> PhaseError {
    match error.into_phase_error() {
        PhaseError::Retryable { code, message } => PhaseError::Retryable {
            code,
            message: format!("{}: {}", source, message),
        },
        PhaseError::Fatal { code, message } => PhaseError::Fatal {
            code,
            message: format!("{}: {}", source, message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        ApplicationStore, CreateApplicationRequest, SqliteApplicationStore,
    };
    use crate::budget::{BudgetConfig, SqliteApiCallLog};
    use crate::phase::{SqlitePhaseMetricStore, PHASE_TIMEOUT};
    use crate::testing::{fixtures, MockAiEngine, MockEnrichmentProvider, MockGeocoder, MockRenderer};

    struct Harness {
        executor: PhaseExecutor,
        ledger: Arc<BudgetLedger>,
        metrics: Arc<SqlitePhaseMetricStore>,
        geocoder: Arc<MockGeocoder>,
        store: Arc<SqliteApplicationStore>,
    }

    fn harness(providers: Vec<Arc<MockEnrichmentProvider>>, config: PhaseConfig) -> Harness {
        let store = Arc::new(SqliteApplicationStore::in_memory().unwrap());
        let ledger = Arc::new(BudgetLedger::new(
            Arc::new(SqliteApiCallLog::in_memory().unwrap()),
            store.clone(),
            BudgetConfig::default(),
        ));
        let metrics = Arc::new(SqlitePhaseMetricStore::in_memory().unwrap());
        let geocoder = Arc::new(MockGeocoder::new());
        let collaborators = Collaborators {
            geocoder: geocoder.clone(),
            providers: providers
                .into_iter()
                .map(|p| p as Arc<dyn crate::phase::EnrichmentProvider>)
                .collect(),
            ai_engine: Arc::new(MockAiEngine::new()),
            renderer: Arc::new(MockRenderer::new()),
        };
        let executor = PhaseExecutor::new(collaborators, ledger.clone(), metrics.clone(), config);
        Harness {
            executor,
            ledger,
            metrics,
            geocoder,
            store,
        }
    }

    fn new_application(h: &Harness) -> Application {
        h.store
            .create(CreateApplicationRequest::new("350 Fifth Avenue, New York"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_geocode_records_call_and_metric() {
        let h = harness(vec![], PhaseConfig::default());
        let app = new_application(&h);

        let output = h.executor.execute(&app, PhaseName::Geocode).await.unwrap();
        assert!(matches!(output.product, PhaseProduct::Geocode(_)));
        assert_eq!(h.ledger.check_budget(&app.id).call_count, 1);

        let records = h.metrics.list_for_application(&app.id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert!(records[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_enrich_without_coordinates_is_fatal() {
        let h = harness(
            vec![Arc::new(MockEnrichmentProvider::new("census"))],
            PhaseConfig::default(),
        );
        let app = new_application(&h);

        let err = h.executor.execute(&app, PhaseName::Enrich).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), MISSING_COORDINATES);
        assert_eq!(h.ledger.check_budget(&app.id).call_count, 0);

        let records = h.metrics.list_for_application(&app.id).unwrap();
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn test_provider_failure_only_flags() {
        let failing = Arc::new(MockEnrichmentProvider::new("traffic"));
        failing.fail_with(CollaboratorError::Status {
            status: 503,
            body: "maintenance".to_string(),
        });
        let h = harness(
            vec![
                Arc::new(MockEnrichmentProvider::new("census")),
                failing,
                Arc::new(MockEnrichmentProvider::new("flood")),
            ],
            PhaseConfig::default(),
        );
        let mut app = new_application(&h);
        app.content.geocode = Some(fixtures::geocode_result());

        let output = h.executor.execute(&app, PhaseName::Enrich).await.unwrap();
        assert_eq!(output.data_flags, vec!["traffic_api_error".to_string()]);
        match output.product {
            PhaseProduct::Enrichment(data) => {
                assert!(data.providers.contains_key("census"));
                assert!(data.providers.contains_key("flood"));
                assert!(!data.providers.contains_key("traffic"));
            }
            other => panic!("unexpected product: {:?}", other),
        }
        // One call-log entry per provider, failed or not.
        assert_eq!(h.ledger.check_budget(&app.id).call_count, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let h = harness(
            vec![],
            PhaseConfig {
                phase_timeout_secs: 1,
                ..PhaseConfig::default()
            },
        );
        h.geocoder.set_delay(Duration::from_secs(3));
        let app = new_application(&h);

        let err = h.executor.execute(&app, PhaseName::Geocode).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code(), PHASE_TIMEOUT);

        let records = h.metrics.list_for_application(&app.id).unwrap();
        assert!(!records[0].success);
        assert!(records[0].error_message.as_deref().unwrap().contains("PHASE_TIMEOUT"));
    }

    #[tokio::test]
    async fn test_deadline_covers_whole_enrich_fan_out() {
        let slow_first = Arc::new(MockEnrichmentProvider::new("census"));
        let slow_second = Arc::new(MockEnrichmentProvider::new("flood"));
        slow_first.set_delay(Duration::from_millis(800));
        slow_second.set_delay(Duration::from_millis(800));
        let h = harness(
            vec![slow_first, slow_second],
            PhaseConfig {
                phase_timeout_secs: 1,
                max_parallel_providers: 1,
            },
        );
        let mut app = new_application(&h);
        app.content.geocode = Some(fixtures::geocode_result());

        let started = Instant::now();
        let output = h.executor.execute(&app, PhaseName::Enrich).await.unwrap();
        // Each call fits the timeout on its own; together they would not
        assert!(started.elapsed() < Duration::from_millis(1_400));
        assert_eq!(output.data_flags, vec!["flood_api_error".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_input_is_fatal() {
        let h = harness(vec![], PhaseConfig::default());
        h.geocoder
            .fail_with(CollaboratorError::Rejected("unparseable address".to_string()));
        let app = new_application(&h);

        let err = h.executor.execute(&app, PhaseName::Geocode).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().starts_with("mock-geocoder: "));
    }

    #[tokio::test]
    async fn test_analyze_and_render() {
        let h = harness(vec![], PhaseConfig::default());
        let app = new_application(&h);

        let output = h.executor.execute(&app, PhaseName::Analyze).await.unwrap();
        assert!(matches!(output.product, PhaseProduct::Analysis(_)));

        let output = h.executor.execute(&app, PhaseName::Render).await.unwrap();
        assert!(matches!(output.product, PhaseProduct::Document(_)));

        assert_eq!(h.metrics.list_for_application(&app.id).unwrap().len(), 2);
    }
}

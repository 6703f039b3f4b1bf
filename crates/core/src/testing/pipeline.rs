//! In-memory pipeline wiring for tests.

use std::sync::Arc;

use crate::application::{
    Application, ApplicationStatus, ApplicationStore, CreateApplicationRequest,
    SqliteApplicationStore,
};
use crate::budget::{BudgetConfig, BudgetLedger, SqliteApiCallLog};
use crate::orchestrator::{OrchestratorConfig, Orchestrator};
use crate::phase::{PhaseConfig, PhaseExecutor, SqlitePhaseMetricStore};

use super::fixtures::{self, MockCollaborators};

/// Stores, ledger, executor and orchestrator over in-memory SQLite and
/// mock collaborators (providers `census` and `flood_zone`).
pub struct TestPipeline {
    pub store: Arc<SqliteApplicationStore>,
    pub call_log: Arc<SqliteApiCallLog>,
    pub metric_store: Arc<SqlitePhaseMetricStore>,
    pub ledger: Arc<BudgetLedger>,
    pub orchestrator: Arc<Orchestrator>,
    pub mocks: MockCollaborators,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(
            OrchestratorConfig::default(),
            BudgetConfig::default(),
            PhaseConfig::default(),
        )
    }

    pub fn with_config(
        orchestrator_config: OrchestratorConfig,
        budget_config: BudgetConfig,
        phase_config: PhaseConfig,
    ) -> Self {
        let store = Arc::new(SqliteApplicationStore::in_memory().expect("in-memory store"));
        let call_log = Arc::new(SqliteApiCallLog::in_memory().expect("in-memory call log"));
        let metric_store =
            Arc::new(SqlitePhaseMetricStore::in_memory().expect("in-memory metric store"));
        let ledger = Arc::new(BudgetLedger::new(
            call_log.clone(),
            store.clone(),
            budget_config,
        ));
        let mocks = MockCollaborators::new(&["census", "flood_zone"]);
        let executor = Arc::new(PhaseExecutor::new(
            mocks.collaborators(),
            ledger.clone(),
            metric_store.clone(),
            phase_config,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            ledger.clone(),
            executor,
            orchestrator_config,
        ));

        Self {
            store,
            call_log,
            metric_store,
            ledger,
            orchestrator,
            mocks,
        }
    }

    /// Create a paid application at the given address.
    pub fn create(&self, address: &str) -> Application {
        self.store
            .create(CreateApplicationRequest::new(address))
            .expect("create application")
    }

    pub fn get(&self, id: &str) -> Application {
        self.store
            .get(id)
            .expect("get application")
            .expect("application exists")
    }

    /// Rewrite an application through the store, bypassing the orchestrator.
    pub fn update(&self, id: &str, change: impl FnOnce(&mut Application)) -> Application {
        let current = self.get(id);
        let mut next = current.clone();
        change(&mut next);
        self.store
            .compare_and_swap(&next, current.status_revision)
            .expect("compare and swap")
            .expect("revision unchanged")
    }

    /// Put an application in `status` with the content earlier phases would
    /// have produced.
    pub fn place_in(&self, id: &str, status: ApplicationStatus) -> Application {
        self.update(id, |app| {
            app.status = status;
            if status != ApplicationStatus::Queued {
                app.content.geocode = Some(fixtures::geocode_result());
            }
        })
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

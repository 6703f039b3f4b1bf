use std::sync::Arc;

use anyhow::{Context, Result};

use feasibility_core::{
    audit::{AuditHandle, AuditStore},
    phase::PhaseMetricStore,
    ApplicationStore, BudgetLedger, Collaborators, Config, DispatchPool, Orchestrator,
    PhaseExecutor, SanitizedConfig, SqliteApiCallLog, SqliteApplicationStore,
    SqlitePhaseMetricStore, StalledJobSweeper,
};

use crate::scheduler::Scheduler;

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    metric_store: Arc<dyn PhaseMetricStore>,
    orchestrator: Arc<Orchestrator>,
    dispatch: Arc<DispatchPool>,
    sweeper: Arc<StalledJobSweeper>,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Open every store on the configured database and wire the pipeline
    /// components around the given collaborators.
    pub fn open(
        config: Config,
        collaborators: Collaborators,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        let db_path = &config.database.path;

        let store: Arc<dyn ApplicationStore> = Arc::new(
            SqliteApplicationStore::new(db_path).context("Failed to create application store")?,
        );
        let call_log =
            Arc::new(SqliteApiCallLog::new(db_path).context("Failed to create API call log")?);
        let metric_store = Arc::new(
            SqlitePhaseMetricStore::new(db_path).context("Failed to create phase metric store")?,
        );

        let ledger = Arc::new(
            BudgetLedger::new(call_log, Arc::clone(&store), config.budget.clone())
                .with_audit(audit.clone()),
        );
        let executor = Arc::new(PhaseExecutor::new(
            collaborators,
            Arc::clone(&ledger),
            metric_store.clone(),
            config.phase.clone(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(store, ledger, executor, config.orchestrator.clone())
                .with_audit(audit.clone()),
        );
        let dispatch = Arc::new(
            DispatchPool::new(Arc::clone(&orchestrator), config.dispatch.clone())
                .with_audit(audit.clone()),
        );
        let sweeper = Arc::new(
            StalledJobSweeper::new(Arc::clone(&orchestrator), config.sweeper.clone())
                .with_audit(audit.clone()),
        );

        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            config.retention.clone(),
            Arc::clone(&dispatch),
            Arc::clone(&sweeper),
            Arc::clone(orchestrator.ledger()),
            metric_store.clone(),
            Some(audit.clone()),
        ));

        Ok(Self {
            config,
            audit,
            audit_store,
            metric_store,
            orchestrator,
            dispatch,
            sweeper,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        self.orchestrator.store()
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        self.orchestrator.ledger()
    }

    pub fn metric_store(&self) -> &Arc<dyn PhaseMetricStore> {
        &self.metric_store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn dispatch(&self) -> &Arc<DispatchPool> {
        &self.dispatch
    }

    pub fn sweeper(&self) -> &Arc<StalledJobSweeper> {
        &self.sweeper
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

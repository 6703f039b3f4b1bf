pub mod application;
pub mod audit;
pub mod budget;
pub mod collaborator;
pub mod config;
mod db;
pub mod dispatch;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod sweeper;
pub mod testing;

pub use application::{
    Application, ApplicationFilter, ApplicationStatus, ApplicationStore,
    CreateApplicationRequest, SqliteApplicationStore, StoreError,
};
pub use budget::{BudgetConfig, BudgetError, BudgetLedger, BudgetStatus, SqliteApiCallLog};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use dispatch::{DispatchConfig, DispatchPool, DispatchReport};
pub use orchestrator::{OrchestrationOutcome, Orchestrator, OrchestratorConfig, OrchestratorError};
pub use phase::{Collaborators, PhaseExecutor, PhaseName, SqlitePhaseMetricStore};
pub use sweeper::{RecoverErrorsReport, StalledJobSweeper, SweepReport, SweeperConfig};

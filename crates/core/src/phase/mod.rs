//! Pipeline phases: collaborator interfaces, phase metrics and the executor.

mod config;
mod executor;
mod metric_store;
mod traits;
mod types;

pub use config::PhaseConfig;
pub use executor::PhaseExecutor;
pub use metric_store::{PhaseMetricError, PhaseMetricStore, SqlitePhaseMetricStore, ABANDONED};
pub use traits::{
    AiEngine, CollaboratorError, Collaborators, EnrichmentProvider, Geocoder, Renderer,
};
pub use types::{
    AiAnalysis, DocumentRef, EnrichmentData, EnrichmentRequest, GeocodeResult, PhaseContext,
    PhaseError, PhaseMetricRecord, PhaseName, PhaseOutput, PhaseProduct, ProviderData,
    MISSING_COORDINATES, PHASE_TIMEOUT,
};

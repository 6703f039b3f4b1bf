//! External collaborator interfaces used by the phase executor.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    AiAnalysis, DocumentRef, EnrichmentRequest, GeocodeResult, PhaseContext, PhaseError,
    ProviderData, PHASE_TIMEOUT,
};

/// Errors returned by collaborator implementations.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status.
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The collaborator refused the input itself.
    #[error("input rejected: {0}")]
    Rejected(String),

    /// Response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Classify into a phase error.
    ///
    /// Rejected input and 4xx responses (other than 408 and 429) are fatal;
    /// everything else can succeed on a later attempt.
    pub fn into_phase_error(self) -> PhaseError {
        let message = self.to_string();
        match self {
            CollaboratorError::Transport(_) => PhaseError::retryable("NETWORK_ERROR", message),
            CollaboratorError::Timeout => PhaseError::retryable(PHASE_TIMEOUT, message),
            CollaboratorError::Malformed(_) => {
                PhaseError::retryable("MALFORMED_RESPONSE", message)
            }
            CollaboratorError::Rejected(_) => PhaseError::fatal("INVALID_INPUT", message),
            CollaboratorError::Status { status, .. } => match status {
                408 | 429 => PhaseError::retryable("UPSTREAM_UNAVAILABLE", message),
                400..=499 => PhaseError::fatal("UPSTREAM_REJECTED", message),
                _ => PhaseError::retryable("UPSTREAM_ERROR", message),
            },
        }
    }
}

/// Resolves an address to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Name recorded in the API call log.
    fn name(&self) -> &str;

    async fn geocode(&self, address: &str) -> Result<GeocodeResult, CollaboratorError>;
}

/// One external data source consulted during enrichment.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Provider name; used for the call log and the `<name>_api_error` flag.
    fn name(&self) -> &str;

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<ProviderData, CollaboratorError>;
}

/// Produces the feasibility analysis.
#[async_trait]
pub trait AiEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, context: &PhaseContext) -> Result<AiAnalysis, CollaboratorError>;
}

/// Renders the final report.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, context: &PhaseContext) -> Result<DocumentRef, CollaboratorError>;
}

/// The full set of collaborators the executor dispatches to.
#[derive(Clone)]
pub struct Collaborators {
    pub geocoder: Arc<dyn Geocoder>,
    pub providers: Vec<Arc<dyn EnrichmentProvider>>,
    pub ai_engine: Arc<dyn AiEngine>,
    pub renderer: Arc<dyn Renderer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CollaboratorError::Transport("reset".into())
            .into_phase_error()
            .is_retryable());
        assert!(CollaboratorError::Timeout.into_phase_error().is_retryable());
        assert!(CollaboratorError::Malformed("eof".into())
            .into_phase_error()
            .is_retryable());

        let err = CollaboratorError::Status {
            status: 503,
            body: "down".into(),
        }
        .into_phase_error();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "UPSTREAM_ERROR");

        let err = CollaboratorError::Status {
            status: 429,
            body: String::new(),
        }
        .into_phase_error();
        assert!(err.is_retryable());

        let err = CollaboratorError::Status {
            status: 422,
            body: "bad address".into(),
        }
        .into_phase_error();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "UPSTREAM_REJECTED");

        let err = CollaboratorError::Rejected("empty address".into()).into_phase_error();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}

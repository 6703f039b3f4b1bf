//! Phase names, phase content and phase errors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{Application, PhaseContent};

/// Error code for a collaborator call that exceeded the phase timeout.
pub const PHASE_TIMEOUT: &str = "PHASE_TIMEOUT";

/// Error code for enrichment attempted before geocoding wrote coordinates.
pub const MISSING_COORDINATES: &str = "E402";

/// One unit of external work in the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Geocode,
    Enrich,
    Analyze,
    Render,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Geocode => "geocode",
            PhaseName::Enrich => "enrich",
            PhaseName::Analyze => "analyze",
            PhaseName::Render => "render",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geocode" => Ok(PhaseName::Geocode),
            "enrich" => Ok(PhaseName::Enrich),
            "analyze" => Ok(PhaseName::Analyze),
            "render" => Ok(PhaseName::Render),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

// ============================================================================
// Phase content
// ============================================================================

/// Coordinates resolved from an address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    /// Match precision reported by the geocoder (e.g. "rooftop").
    pub precision: String,
    /// Which geocoder produced the result.
    pub source: String,
}

/// Raw payload returned by one enrichment provider.
pub type ProviderData = serde_json::Value;

/// Input handed to every enrichment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentRequest {
    pub application_id: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

/// Merged output of the enrichment providers, keyed by provider name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentData {
    pub providers: BTreeMap<String, ProviderData>,
}

/// Result of the AI analysis phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiAnalysis {
    pub score: f64,
    pub narrative: String,
}

/// Location of a rendered report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    pub url: String,
}

/// Read-only view of an application handed to the AI engine and renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseContext {
    pub application_id: String,
    pub address: String,
    pub geocode: Option<GeocodeResult>,
    pub enrichment: Option<EnrichmentData>,
    pub analysis: Option<AiAnalysis>,
    pub data_flags: Vec<String>,
}

impl PhaseContext {
    pub fn from_application(application: &Application) -> Self {
        Self {
            application_id: application.id.clone(),
            address: application.address.clone(),
            geocode: application.content.geocode.clone(),
            enrichment: application.content.enrichment.clone(),
            analysis: application.content.analysis.clone(),
            data_flags: application.data_flags.clone(),
        }
    }
}

/// The content a single phase produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseProduct {
    Geocode(GeocodeResult),
    Enrichment(EnrichmentData),
    Analysis(AiAnalysis),
    Document(DocumentRef),
}

/// What a successful phase hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    pub phase: PhaseName,
    pub product: PhaseProduct,
    /// Degraded-data flags raised while running the phase.
    pub data_flags: Vec<String>,
}

impl PhaseOutput {
    pub fn new(phase: PhaseName, product: PhaseProduct) -> Self {
        Self {
            phase,
            product,
            data_flags: Vec::new(),
        }
    }

    /// Write the product into the matching content slot.
    pub fn apply_to(&self, content: &mut PhaseContent) {
        match &self.product {
            PhaseProduct::Geocode(geocode) => content.geocode = Some(geocode.clone()),
            PhaseProduct::Enrichment(data) => content.enrichment = Some(data.clone()),
            PhaseProduct::Analysis(analysis) => content.analysis = Some(analysis.clone()),
            PhaseProduct::Document(document) => content.document = Some(document.clone()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Classified phase failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    /// Transient failure; the orchestrator may try again later.
    #[error("{code}: {message}")]
    Retryable { code: String, message: String },

    /// Permanent failure; the application goes straight to `error`.
    #[error("{code}: {message}")]
    Fatal { code: String, message: String },
}

impl PhaseError {
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        PhaseError::Retryable {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        PhaseError::Fatal {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            PhaseError::Retryable { code, .. } | PhaseError::Fatal { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PhaseError::Retryable { message, .. } | PhaseError::Fatal { message, .. } => message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PhaseError::Retryable { .. })
    }
}

// ============================================================================
// Phase metric records
// ============================================================================

/// Audit row for one phase execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseMetricRecord {
    pub id: i64,
    pub application_id: String,
    pub phase: PhaseName,
    pub started_at: DateTime<Utc>,
    /// `None` while the phase is still running.
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

//! Scriptable mock collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::phase::{
    AiAnalysis, AiEngine, CollaboratorError, DocumentRef, EnrichmentProvider, EnrichmentRequest,
    GeocodeResult, Geocoder, PhaseContext, ProviderData, Renderer,
};

/// Shared failure/delay script used by every mock.
#[derive(Debug, Default)]
struct Script {
    /// Failures returned by the next calls, in order.
    queued: VecDeque<CollaboratorError>,
    /// Failure returned by every call once the queue is empty.
    persistent: Option<CollaboratorError>,
    delay: Option<Duration>,
    panic_message: Option<String>,
    calls: usize,
}

#[derive(Debug, Default)]
struct ScriptHandle(Mutex<Script>);

impl ScriptHandle {
    async fn step(&self) -> Result<(), CollaboratorError> {
        let (delay, outcome, panic_message) = {
            let mut script = self.0.lock().unwrap();
            script.calls += 1;
            let outcome = match script.queued.pop_front() {
                Some(err) => Err(err),
                None => match script.persistent.clone() {
                    Some(err) => Err(err),
                    None => Ok(()),
                },
            };
            (script.delay, outcome, script.panic_message.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = panic_message {
            panic!("{}", message);
        }
        outcome
    }

    fn fail_next(&self, error: CollaboratorError) {
        self.0.lock().unwrap().queued.push_back(error);
    }

    fn fail_with(&self, error: CollaboratorError) {
        self.0.lock().unwrap().persistent = Some(error);
    }

    fn succeed(&self) {
        let mut script = self.0.lock().unwrap();
        script.queued.clear();
        script.persistent = None;
        script.panic_message = None;
    }

    fn set_delay(&self, delay: Duration) {
        self.0.lock().unwrap().delay = Some(delay);
    }

    fn panic_with(&self, message: &str) {
        self.0.lock().unwrap().panic_message = Some(message.to_string());
    }

    fn calls(&self) -> usize {
        self.0.lock().unwrap().calls
    }
}

macro_rules! script_controls {
    ($ty:ty) => {
        impl $ty {
            /// Fail the next call with `error`. Calls queue up in order.
            pub fn fail_next(&self, error: CollaboratorError) {
                self.script.fail_next(error);
            }

            /// Fail every call with `error` until [`succeed`](Self::succeed).
            pub fn fail_with(&self, error: CollaboratorError) {
                self.script.fail_with(error);
            }

            /// Clear all scripted failures and panics.
            pub fn succeed(&self) {
                self.script.succeed();
            }

            /// Sleep this long before answering.
            pub fn set_delay(&self, delay: Duration) {
                self.script.set_delay(delay);
            }

            /// Panic inside the call.
            pub fn panic_with(&self, message: &str) {
                self.script.panic_with(message);
            }

            /// Number of calls received so far.
            pub fn call_count(&self) -> usize {
                self.script.calls()
            }
        }
    };
}

// ============================================================================
// Geocoder
// ============================================================================

/// Mock geocoder returning a fixed location.
#[derive(Debug, Default)]
pub struct MockGeocoder {
    script: ScriptHandle,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }
}

script_controls!(MockGeocoder);

#[async_trait]
impl Geocoder for MockGeocoder {
    fn name(&self) -> &str {
        "mock-geocoder"
    }

    async fn geocode(&self, _address: &str) -> Result<GeocodeResult, CollaboratorError> {
        self.script.step().await?;
        Ok(super::fixtures::geocode_result())
    }
}

// ============================================================================
// Enrichment provider
// ============================================================================

/// Mock enrichment provider that echoes the request coordinates.
#[derive(Debug)]
pub struct MockEnrichmentProvider {
    name: String,
    script: ScriptHandle,
}

impl MockEnrichmentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: ScriptHandle::default(),
        }
    }
}

script_controls!(MockEnrichmentProvider);

#[async_trait]
impl EnrichmentProvider for MockEnrichmentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<ProviderData, CollaboratorError> {
        self.script.step().await?;
        Ok(serde_json::json!({
            "provider": self.name,
            "lat": request.lat,
            "lng": request.lng,
        }))
    }
}

// ============================================================================
// AI engine
// ============================================================================

#[derive(Debug, Default)]
pub struct MockAiEngine {
    script: ScriptHandle,
}

impl MockAiEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

script_controls!(MockAiEngine);

#[async_trait]
impl AiEngine for MockAiEngine {
    fn name(&self) -> &str {
        "mock-ai"
    }

    async fn analyze(&self, context: &PhaseContext) -> Result<AiAnalysis, CollaboratorError> {
        self.script.step().await?;
        Ok(AiAnalysis {
            score: 0.8,
            narrative: format!("Feasible development at {}", context.address),
        })
    }
}

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Default)]
pub struct MockRenderer {
    script: ScriptHandle,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

script_controls!(MockRenderer);

#[async_trait]
impl Renderer for MockRenderer {
    fn name(&self) -> &str {
        "mock-renderer"
    }

    async fn render(&self, context: &PhaseContext) -> Result<DocumentRef, CollaboratorError> {
        self.script.step().await?;
        Ok(DocumentRef {
            url: format!("https://reports.invalid/{}.pdf", context.application_id),
        })
    }
}

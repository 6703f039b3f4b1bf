//! Testing utilities and mock collaborators.
//!
//! Every external collaborator trait has a scriptable mock here, so the
//! whole pipeline can run in tests without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use feasibility_core::testing::{MockGeocoder, fixtures};
//! use feasibility_core::phase::CollaboratorError;
//!
//! let geocoder = MockGeocoder::new();
//! geocoder.fail_next(CollaboratorError::Timeout);
//!
//! let collaborators = fixtures::collaborators_with(geocoder.into(), vec![]);
//! ```

mod mock_collaborators;
mod pipeline;

pub use mock_collaborators::{MockAiEngine, MockEnrichmentProvider, MockGeocoder, MockRenderer};
pub use pipeline::TestPipeline;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use super::{MockAiEngine, MockEnrichmentProvider, MockGeocoder, MockRenderer};
    use crate::phase::{Collaborators, EnrichmentProvider, GeocodeResult};

    /// A rooftop-precision location.
    pub fn geocode_result() -> GeocodeResult {
        GeocodeResult {
            lat: 40.748_817,
            lng: -73.985_428,
            precision: "rooftop".to_string(),
            source: "mock-geocoder".to_string(),
        }
    }

    /// Collaborators built from the given geocoder and providers, with
    /// default AI engine and renderer mocks.
    pub fn collaborators_with(
        geocoder: Arc<MockGeocoder>,
        providers: Vec<Arc<MockEnrichmentProvider>>,
    ) -> Collaborators {
        Collaborators {
            geocoder,
            providers: providers
                .into_iter()
                .map(|p| p as Arc<dyn EnrichmentProvider>)
                .collect(),
            ai_engine: Arc::new(MockAiEngine::new()),
            renderer: Arc::new(MockRenderer::new()),
        }
    }

    /// Collaborators that all succeed, with two enrichment providers.
    pub fn default_collaborators() -> Collaborators {
        collaborators_with(
            Arc::new(MockGeocoder::new()),
            vec![
                Arc::new(MockEnrichmentProvider::new("census")),
                Arc::new(MockEnrichmentProvider::new("flood_zone")),
            ],
        )
    }

    /// Handles to every mock behind a [`Collaborators`] set.
    pub struct MockCollaborators {
        pub geocoder: Arc<MockGeocoder>,
        pub providers: Vec<Arc<MockEnrichmentProvider>>,
        pub ai_engine: Arc<MockAiEngine>,
        pub renderer: Arc<MockRenderer>,
    }

    impl MockCollaborators {
        pub fn new(provider_names: &[&str]) -> Self {
            Self {
                geocoder: Arc::new(MockGeocoder::new()),
                providers: provider_names
                    .iter()
                    .map(|name| Arc::new(MockEnrichmentProvider::new(*name)))
                    .collect(),
                ai_engine: Arc::new(MockAiEngine::new()),
                renderer: Arc::new(MockRenderer::new()),
            }
        }

        pub fn collaborators(&self) -> Collaborators {
            Collaborators {
                geocoder: self.geocoder.clone(),
                providers: self
                    .providers
                    .iter()
                    .map(|p| p.clone() as Arc<dyn EnrichmentProvider>)
                    .collect(),
                ai_engine: self.ai_engine.clone(),
                renderer: self.renderer.clone(),
            }
        }

        pub fn provider(&self, name: &str) -> Option<&Arc<MockEnrichmentProvider>> {
            use crate::phase::EnrichmentProvider as _;
            self.providers.iter().find(|p| p.name() == name)
        }
    }
}

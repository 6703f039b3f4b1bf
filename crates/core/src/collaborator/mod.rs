//! HTTP implementations of the phase collaborators.

mod config;
mod http;

pub use config::{CollaboratorsConfig, EndpointConfig, ProviderConfig};
pub use http::{
    build_collaborators, HttpAiEngine, HttpEnrichmentProvider, HttpGeocoder, HttpRenderer,
};

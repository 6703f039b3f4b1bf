//! reqwest-backed collaborator clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::phase::{
    AiAnalysis, AiEngine, CollaboratorError, Collaborators, DocumentRef, EnrichmentProvider,
    EnrichmentRequest, GeocodeResult, Geocoder, PhaseContext, ProviderData, Renderer,
};

use super::config::{CollaboratorsConfig, EndpointConfig};

/// Shared HTTP plumbing for one endpoint.
struct Endpoint {
    client: Client,
    config: EndpointConfig,
}

impl Endpoint {
    fn new(config: EndpointConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.api_key {
            Some(ref key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CollaboratorError> {
        let response = self.authorize(request).send().await.map_err(send_error)?;
        decode(response).await
    }
}

fn send_error(error: reqwest::Error) -> CollaboratorError {
    if error.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Transport(error.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CollaboratorError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

// ============================================================================
// Geocoder
// ============================================================================

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    lat: f64,
    lng: f64,
    #[serde(default = "default_precision")]
    precision: String,
}

fn default_precision() -> String {
    "unknown".to_string()
}

/// `GET {url}?address=<encoded>` returning `{lat, lng, precision}`.
pub struct HttpGeocoder {
    endpoint: Endpoint,
}

impl HttpGeocoder {
    pub fn new(config: EndpointConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }

    fn request_url(&self, address: &str) -> String {
        let separator = if self.endpoint.config.url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}address={}",
            self.endpoint.config.url,
            separator,
            urlencoding::encode(address)
        )
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    fn name(&self) -> &str {
        "geocoder"
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeResult, CollaboratorError> {
        if address.trim().is_empty() {
            return Err(CollaboratorError::Rejected("empty address".to_string()));
        }
        let url = self.request_url(address);
        debug!(url = %url, "Geocoding address");

        let response: GeocodeResponse = self.endpoint.send(self.endpoint.client.get(&url)).await?;
        Ok(GeocodeResult {
            lat: response.lat,
            lng: response.lng,
            precision: response.precision,
            source: self.name().to_string(),
        })
    }
}

// ============================================================================
// Enrichment provider
// ============================================================================

/// `POST {url}` with the [`EnrichmentRequest`] as JSON; any JSON body is
/// kept as the provider's data.
pub struct HttpEnrichmentProvider {
    name: String,
    endpoint: Endpoint,
}

impl HttpEnrichmentProvider {
    pub fn new(name: impl Into<String>, config: EndpointConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::new(config)?,
        })
    }
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<ProviderData, CollaboratorError> {
        debug!(provider = %self.name, application_id = %request.application_id, "Querying enrichment provider");
        let builder = self
            .endpoint
            .client
            .post(&self.endpoint.config.url)
            .json(request);
        self.endpoint.send(builder).await
    }
}

// ============================================================================
// AI engine and renderer
// ============================================================================

/// `POST {url}` with the [`PhaseContext`], returning `{score, narrative}`.
pub struct HttpAiEngine {
    endpoint: Endpoint,
}

impl HttpAiEngine {
    pub fn new(config: EndpointConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }
}

#[async_trait]
impl AiEngine for HttpAiEngine {
    fn name(&self) -> &str {
        "ai_engine"
    }

    async fn analyze(&self, context: &PhaseContext) -> Result<AiAnalysis, CollaboratorError> {
        let builder = self
            .endpoint
            .client
            .post(&self.endpoint.config.url)
            .json(context);
        self.endpoint.send(builder).await
    }
}

/// `POST {url}` with the [`PhaseContext`], returning `{url}` of the report.
pub struct HttpRenderer {
    endpoint: Endpoint,
}

impl HttpRenderer {
    pub fn new(config: EndpointConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &str {
        "renderer"
    }

    async fn render(&self, context: &PhaseContext) -> Result<DocumentRef, CollaboratorError> {
        let builder = self
            .endpoint
            .client
            .post(&self.endpoint.config.url)
            .json(context);
        self.endpoint.send(builder).await
    }
}

/// Build the HTTP collaborator set from configuration.
pub fn build_collaborators(config: &CollaboratorsConfig) -> Result<Collaborators, CollaboratorError> {
    let providers = config
        .providers
        .iter()
        .map(|p| {
            HttpEnrichmentProvider::new(p.name.clone(), p.endpoint.clone())
                .map(|provider| Arc::new(provider) as Arc<dyn EnrichmentProvider>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Collaborators {
        geocoder: Arc::new(HttpGeocoder::new(config.geocoder.clone())?),
        providers,
        ai_engine: Arc::new(HttpAiEngine::new(config.ai_engine.clone())?),
        renderer: Arc::new(HttpRenderer::new(config.renderer.clone())?),
    })
}

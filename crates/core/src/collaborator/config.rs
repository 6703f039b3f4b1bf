//! Endpoint configuration for the HTTP collaborators.

use serde::{Deserialize, Serialize};

/// One HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub url: String,

    /// Sent as a bearer token when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Client-side request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

/// A named enrichment data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider name; appears in the call log and in `<name>_api_error` flags.
    pub name: String,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

/// All external collaborators.
///
/// ```toml
/// [collaborators.geocoder]
/// url = "https://geo.example.com/v1/geocode"
///
/// [[collaborators.providers]]
/// name = "census"
/// url = "https://census.example.com/v2/tract"
///
/// [collaborators.ai_engine]
/// url = "https://ai.example.com/analyze"
///
/// [collaborators.renderer]
/// url = "https://pdf.example.com/render"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollaboratorsConfig {
    pub geocoder: EndpointConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    pub ai_engine: EndpointConfig,
    pub renderer: EndpointConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collaborators() {
        let toml = r#"
            [geocoder]
            url = "http://geo.local/geocode"
            api_key = "geo-key"

            [[providers]]
            name = "census"
            url = "http://census.local/tract"

            [[providers]]
            name = "flood_zone"
            url = "http://flood.local/zone"
            timeout_secs = 10

            [ai_engine]
            url = "http://ai.local/analyze"

            [renderer]
            url = "http://pdf.local/render"
        "#;
        let config: CollaboratorsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.geocoder.api_key.as_deref(), Some("geo-key"));
        assert_eq!(config.geocoder.timeout_secs, 60);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].name, "flood_zone");
        assert_eq!(config.providers[1].endpoint.timeout_secs, 10);
        assert_eq!(config.renderer.url, "http://pdf.local/render");
    }
}

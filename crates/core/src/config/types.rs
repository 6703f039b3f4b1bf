use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::budget::BudgetConfig;
use crate::collaborator::CollaboratorsConfig;
use crate::dispatch::DispatchConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::phase::PhaseConfig;
use crate::sweeper::SweeperConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// HTTP collaborators. Required to run the server.
    #[serde(default)]
    pub collaborators: Option<CollaboratorsConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("feasibility.db")
}

/// Periodic background jobs run by the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SchedulerConfig {
    /// When disabled, dispatch and sweeps only run through the API.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_dispatch_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    600 // 10 minutes
}

fn default_retention_interval() -> u64 {
    86_400 // daily
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            dispatch_interval_secs: default_dispatch_interval(),
            sweep_interval_secs: default_sweep_interval(),
            retention_interval_secs: default_retention_interval(),
        }
    }
}

/// Time-based cleanup of the call log and phase metrics.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub budget: BudgetConfig,
    pub phase: PhaseConfig,
    pub dispatch: DispatchConfig,
    pub sweeper: SweeperConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaborators: Option<SanitizedCollaboratorsConfig>,
}

/// Collaborator endpoints with API keys hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCollaboratorsConfig {
    pub geocoder: SanitizedEndpoint,
    pub providers: Vec<SanitizedEndpoint>,
    pub ai_engine: SanitizedEndpoint,
    pub renderer: SanitizedEndpoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEndpoint {
    pub name: String,
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

impl SanitizedEndpoint {
    fn new(name: &str, endpoint: &crate::collaborator::EndpointConfig) -> Self {
        Self {
            name: name.to_string(),
            url: endpoint.url.clone(),
            api_key_configured: endpoint.api_key.as_ref().is_some_and(|k| !k.is_empty()),
            timeout_secs: endpoint.timeout_secs,
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            orchestrator: config.orchestrator.clone(),
            budget: config.budget.clone(),
            phase: config.phase.clone(),
            dispatch: config.dispatch.clone(),
            sweeper: config.sweeper.clone(),
            scheduler: config.scheduler.clone(),
            retention: config.retention.clone(),
            collaborators: config
                .collaborators
                .as_ref()
                .map(|c| SanitizedCollaboratorsConfig {
                    geocoder: SanitizedEndpoint::new("geocoder", &c.geocoder),
                    providers: c
                        .providers
                        .iter()
                        .map(|p| SanitizedEndpoint::new(&p.name, &p.endpoint))
                        .collect(),
                    ai_engine: SanitizedEndpoint::new("ai_engine", &c.ai_engine),
                    renderer: SanitizedEndpoint::new("renderer", &c.renderer),
                }),
        }
    }
}

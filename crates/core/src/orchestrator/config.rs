//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Retry and locking policy for the application state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Attempts an application may consume before it is moved to `error`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age after which an advisory lock is considered abandoned (seconds).
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// First retry delay (milliseconds). Doubles with every attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay (milliseconds).
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lock_ttl() -> u64 {
    300 // 5 minutes
}

fn default_backoff_base() -> u64 {
    2_000
}

fn default_backoff_max() -> u64 {
    600_000 // 10 minutes
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lock_ttl_secs: default_lock_ttl(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

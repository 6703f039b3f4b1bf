//! Phase executor configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseConfig {
    /// Upper bound on one phase, every collaborator call included (seconds).
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,

    /// Enrichment providers queried at the same time.
    #[serde(default = "default_max_parallel_providers")]
    pub max_parallel_providers: usize,
}

fn default_phase_timeout() -> u64 {
    120
}

fn default_max_parallel_providers() -> usize {
    4
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            phase_timeout_secs: default_phase_timeout(),
            max_parallel_providers: default_max_parallel_providers(),
        }
    }
}

//! Dispatch pool configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Due applications picked per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Workers pulling from the run's queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_batch_size() -> usize {
    20
}

fn default_concurrency() -> usize {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

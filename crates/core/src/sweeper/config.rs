//! Stalled-job sweeper configuration.

use serde::{Deserialize, Serialize};

/// Stall detection and batch limits.
///
/// There is no attempt cap here: the sweeper uses
/// `orchestrator.max_attempts`, and an old `max_attempts` key is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    /// Minutes without an update before a processing application counts as
    /// stalled.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold_minutes: u32,

    /// Stalled applications recovered per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Only recover applications with confirmed payment.
    #[serde(default = "default_require_payment")]
    pub require_payment: bool,
}

fn default_stall_threshold() -> u32 {
    30
}

fn default_batch_size() -> usize {
    10
}

fn default_require_payment() -> bool {
    true
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stall_threshold_minutes: default_stall_threshold(),
            batch_size: default_batch_size(),
            require_payment: default_require_payment(),
        }
    }
}

//! Budget configuration.

use serde::{Deserialize, Serialize};

/// Per-application limit on external API calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetConfig {
    /// Maximum calls attributed to one application inside the window.
    #[serde(default = "default_max_calls")]
    pub max_calls: u64,

    /// Rolling window length in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
}

fn default_max_calls() -> u64 {
    150
}

fn default_window_hours() -> u32 {
    24
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_hours: default_window_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BudgetConfig::default();
        assert_eq!(config.max_calls, 150);
        assert_eq!(config.window_hours, 24);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BudgetConfig = toml::from_str("max_calls = 40").unwrap();
        assert_eq!(config.max_calls, 40);
        assert_eq!(config.window_hours, 24);
    }
}

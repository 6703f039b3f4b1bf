use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
///
/// Rejects zero values for every limit, interval and pool size, a backoff
/// cap below its base, and collaborator endpoints without a URL or with
/// duplicate provider names.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.max_attempts == 0 {
        return Err(invalid("orchestrator.max_attempts must be at least 1"));
    }
    if orchestrator.lock_ttl_secs == 0 {
        return Err(invalid("orchestrator.lock_ttl_secs cannot be 0"));
    }
    if orchestrator.backoff_base_ms == 0 {
        return Err(invalid("orchestrator.backoff_base_ms cannot be 0"));
    }
    if orchestrator.backoff_max_ms < orchestrator.backoff_base_ms {
        return Err(invalid(
            "orchestrator.backoff_max_ms must be >= orchestrator.backoff_base_ms",
        ));
    }

    if config.budget.max_calls == 0 {
        return Err(invalid("budget.max_calls cannot be 0"));
    }
    if config.budget.window_hours == 0 {
        return Err(invalid("budget.window_hours cannot be 0"));
    }

    if config.phase.phase_timeout_secs == 0 {
        return Err(invalid("phase.phase_timeout_secs cannot be 0"));
    }
    if config.phase.max_parallel_providers == 0 {
        return Err(invalid("phase.max_parallel_providers cannot be 0"));
    }
    if config.phase.phase_timeout_secs >= orchestrator.lock_ttl_secs {
        return Err(invalid(
            "phase.phase_timeout_secs must be below orchestrator.lock_ttl_secs",
        ));
    }

    if config.dispatch.batch_size == 0 {
        return Err(invalid("dispatch.batch_size cannot be 0"));
    }
    if config.dispatch.concurrency == 0 {
        return Err(invalid("dispatch.concurrency cannot be 0"));
    }

    if config.sweeper.stall_threshold_minutes == 0 {
        return Err(invalid("sweeper.stall_threshold_minutes cannot be 0"));
    }
    if config.sweeper.batch_size == 0 {
        return Err(invalid("sweeper.batch_size cannot be 0"));
    }
    if config.sweeper.stall_threshold_minutes as u64 * 60 <= orchestrator.lock_ttl_secs {
        return Err(invalid(
            "sweeper.stall_threshold_minutes must exceed orchestrator.lock_ttl_secs",
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.enabled
        && (scheduler.dispatch_interval_secs == 0
            || scheduler.sweep_interval_secs == 0
            || scheduler.retention_interval_secs == 0)
    {
        return Err(invalid("scheduler intervals cannot be 0"));
    }

    if config.retention.retention_days == 0 {
        return Err(invalid("retention.retention_days cannot be 0"));
    }

    if let Some(ref collaborators) = config.collaborators {
        let endpoints = [
            ("collaborators.geocoder", &collaborators.geocoder),
            ("collaborators.ai_engine", &collaborators.ai_engine),
            ("collaborators.renderer", &collaborators.renderer),
        ];
        for (section, endpoint) in endpoints {
            if endpoint.url.trim().is_empty() {
                return Err(invalid(format!("{}.url cannot be empty", section)));
            }
        }

        let mut names = std::collections::HashSet::new();
        for provider in &collaborators.providers {
            if provider.name.trim().is_empty() {
                return Err(invalid("collaborators.providers[].name cannot be empty"));
            }
            if provider.endpoint.url.trim().is_empty() {
                return Err(invalid(format!(
                    "collaborators.providers '{}' has no url",
                    provider.name
                )));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate enrichment provider '{}'",
                    provider.name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn assert_invalid(toml: &str) {
        let config = load_config_from_str(toml).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_default_config() {
        let config = load_config_from_str("").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        assert_invalid("[server]\nport = 0\n");
    }

    #[test]
    fn test_validate_zero_limits_fail() {
        assert_invalid("[budget]\nmax_calls = 0\n");
        assert_invalid("[orchestrator]\nmax_attempts = 0\n");
        assert_invalid("[dispatch]\nconcurrency = 0\n");
        assert_invalid("[phase]\nphase_timeout_secs = 0\n");
        assert_invalid("[retention]\nretention_days = 0\n");
    }

    #[test]
    fn test_validate_backoff_cap_below_base() {
        assert_invalid("[orchestrator]\nbackoff_base_ms = 5000\nbackoff_max_ms = 1000\n");
    }

    #[test]
    fn test_validate_stall_threshold_vs_lock_ttl() {
        assert_invalid("[sweeper]\nstall_threshold_minutes = 5\n");

        let config =
            load_config_from_str("[sweeper]\nstall_threshold_minutes = 6\n").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_phase_timeout_vs_lock_ttl() {
        assert_invalid("[orchestrator]\nlock_ttl_secs = 60\n[phase]\nphase_timeout_secs = 120\n");
        assert_invalid("[orchestrator]\nlock_ttl_secs = 60\n[phase]\nphase_timeout_secs = 60\n");

        let config = load_config_from_str(
            "[orchestrator]\nlock_ttl_secs = 60\n[phase]\nphase_timeout_secs = 59\n",
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_sweeper_attempt_cap_cannot_diverge() {
        let err = load_config_from_str("[sweeper]\nmax_attempts = 6\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));

        let config = load_config_from_str("[orchestrator]\nmax_attempts = 5\n").unwrap();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.orchestrator.max_attempts, 5);
    }

    #[test]
    fn test_validate_scheduler_disabled_allows_zero_interval() {
        let config =
            load_config_from_str("[scheduler]\nenabled = false\ndispatch_interval_secs = 0\n")
                .unwrap();
        assert!(validate_config(&config).is_ok());
        assert_invalid("[scheduler]\ndispatch_interval_secs = 0\n");
    }

    #[test]
    fn test_validate_duplicate_provider() {
        assert_invalid(
            r#"
[collaborators.geocoder]
url = "http://geo.local"
[[collaborators.providers]]
name = "census"
url = "http://a.local"
[[collaborators.providers]]
name = "census"
url = "http://b.local"
[collaborators.ai_engine]
url = "http://ai.local"
[collaborators.renderer]
url = "http://pdf.local"
"#,
        );
    }
}

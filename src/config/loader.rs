use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use super::schema::Config;
use crate::error::{ConfigError, Result};

/// Loads settings from `flowtrace.toml` (when present) with `FLOWTRACE_*`
/// environment variables taking precedence.
pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("flowtrace.toml"))
        .merge(Env::prefixed("FLOWTRACE_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.service.is_empty() {
        return Err(ConfigError::Validation("service must not be empty".into()).into());
    }

    if !config.agent_url.starts_with("http://") && !config.agent_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "agent URL '{}' must be http(s)",
            config.agent_url
        ))
        .into());
    }

    if config.flush_interval_secs <= 0.0 {
        return Err(
            ConfigError::Validation("flush interval must be greater than 0".into()).into(),
        );
    }

    if config.retry_attempts == 0 {
        return Err(
            ConfigError::Validation("retry attempts must be greater than 0".into()).into(),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.service, "unnamed-rust-service");
        assert_eq!(config.env, "none");
        assert_eq!(config.bucket_size_ns(), 10_000_000_000);
    }

    #[test]
    fn test_rejects_bad_agent_url() {
        let config = Config {
            agent_url: "localhost:8126".into(),
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = Config {
            flush_interval_secs: 0.0,
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_empty_service() {
        let config = Config {
            service: String::new(),
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }
}

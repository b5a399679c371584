//! Configuration management for GrabBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use grabbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `GRABBOX__<section>__<key>`
//!
//! Examples:
//! - `GRABBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `GRABBOX__WORKER__POOL_SIZE=8`
//! - `GRABBOX__QUOTA__TOTAL_CAPACITY=50GB`
//! - `GRABBOX__RETENTION__TERMINAL_TTL=30m`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/grabbox.toml`.
//! This can be overridden using the `GRABBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    Config, QuotaConfig, RateLimitConfig, RetentionConfig, ServerConfig, StorageConfig,
    StorageProvider, WebhookConfig, WorkerConfig,
};
pub use validation::ValidationError;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`GRABBOX__*`)
    /// 2. TOML file (default: `config/grabbox.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = sources::load_from_path(path.as_ref())?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[worker]\npool_size = 1\n").unwrap();

        let config = Config::load_from_path(&config_path).unwrap();
        assert_eq!(config.worker.pool_size, 1);
        assert_eq!(config.rate_limit.max_requests, 60);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[quota]
total_capacity = "1MB"
default_reservation = "2MB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(&config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ReservationExceedsCapacity { .. })
        ));
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rendered.toml");

        let mut config = Config::default();
        config.worker.pool_size = 3;
        config.retention.terminal_ttl = HumanDuration::from_secs(90);
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.worker.pool_size, 3);
        assert_eq!(loaded.retention.terminal_ttl, HumanDuration::from_secs(90));
        assert_eq!(loaded.quota.total_capacity, config.quota.total_capacity);
    }
}

use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "GRABBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/grabbox.toml";
const ENV_PREFIX: &str = "GRABBOX";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `GRABBOX_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    load_layered(&config_path(), None)
}

/// Same layering as [`load`] with an explicit TOML file
pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
    load_layered(config_path, None)
}

/// `env_file` defaults to the `.env` found from the working directory up
fn load_layered(config_path: &Path, env_file: Option<&Path>) -> Result<Config, ConfigError> {
    let loaded = match env_file {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    // A missing .env file is not an error
    if let Err(e) = loaded {
        if !e.not_found() {
            tracing::warn!(error = %e, "Ignoring unreadable .env file");
        }
    }
    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
fn load_from_sources(config_path: &Path) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loading configuration");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "Configuration file not found, using defaults and environment overrides"
        );
    }

    // GRABBOX__WORKER__POOL_SIZE -> worker.pool_size
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .with_list_parse_key("worker.extra_args")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory holding the fjall task store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(64 * 1024)
}

/// Worker pool and downloader configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Wall-clock limit for one executor run
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout: HumanDuration,
    /// Each task works in `<download_dir>/<task_id>/`
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Downloader binary
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            execution_timeout: default_execution_timeout(),
            download_dir: default_download_dir(),
            program: default_program(),
            extra_args: Vec::new(),
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_execution_timeout() -> HumanDuration {
    HumanDuration::from_secs(60 * 60)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

/// Reservation accounting
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    #[serde(default = "default_total_capacity")]
    pub total_capacity: ByteSize,
    /// Reserved per task at admission; the real size is unknown until fetch
    #[serde(default = "default_reservation")]
    pub default_reservation: ByteSize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            total_capacity: default_total_capacity(),
            default_reservation: default_reservation(),
        }
    }
}

fn default_total_capacity() -> ByteSize {
    ByteSize(20 * 1024 * 1024 * 1024) // 20 GB
}

fn default_reservation() -> ByteSize {
    ByteSize(100 * 1024 * 1024) // 100 MB
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window")]
    pub window: HumanDuration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window: default_window(),
        }
    }
}

fn default_max_requests() -> u32 {
    60
}

fn default_window() -> HumanDuration {
    HumanDuration::from_secs(10 * 60)
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// How long SUCCEEDED/FAILED tasks stay readable
    #[serde(default = "default_terminal_ttl")]
    pub terminal_ttl: HumanDuration,
    /// RUNNING tasks older than this are treated as orphaned
    #[serde(default = "default_stale_after")]
    pub stale_after: HumanDuration,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            terminal_ttl: default_terminal_ttl(),
            stale_after: default_stale_after(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_terminal_ttl() -> HumanDuration {
    HumanDuration::from_secs(10 * 60)
}

fn default_stale_after() -> HumanDuration {
    HumanDuration::from_secs(3 * 60 * 60)
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_secs(60)
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
}

/// Artifact offload configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Upload finished artifacts instead of serving them locally
    #[serde(default)]
    pub offload: bool,
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the `local` provider
    pub root: Option<PathBuf>,
    /// Prefix for remote URLs; defaults to `file://<root>` or `memory://`
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_timeout")]
    pub timeout: HumanDuration,
    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,
    /// First backoff delay, doubled per attempt
    #[serde(default = "default_webhook_backoff")]
    pub backoff: HumanDuration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: default_webhook_timeout(),
            max_retries: default_webhook_retries(),
            backoff: default_webhook_backoff(),
        }
    }
}

fn default_webhook_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_webhook_retries() -> u32 {
    3
}

fn default_webhook_backoff() -> HumanDuration {
    HumanDuration::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.worker.pool_size, 4);
        assert_eq!(config.quota.total_capacity.as_u64(), 20 * 1024 * 1024 * 1024);
        assert_eq!(config.quota.default_reservation.as_u64(), 100 * 1024 * 1024);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.retention.terminal_ttl.to_string(), "10m");
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert!(!config.storage.offload);
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(rendered.contains("[worker]"));
        assert!(rendered.contains("execution_timeout = \"1h\""));
    }
}

//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::query::RetryConfig;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix applied to every storage key
    pub namespace: String,
    /// Cache format version; a mismatch clears the namespace on startup
    pub cache_version: String,
    /// Byte ceiling enforced by the cache store
    pub capacity_bytes: u64,
    /// Quota shown by monitoring surfaces
    pub storage_quota_bytes: u64,
    /// Values whose serialized form exceeds this many bytes are compressed
    pub compression_threshold: usize,
    /// Default time an executed query stays cached
    pub default_cache_duration: Duration,
    /// Retry policy for query execution
    pub retry: RetryConfig,
    /// Start rule timers on boot
    pub maintenance_enabled: bool,
    /// Number of maintenance events kept for display
    pub maintenance_history_limit: usize,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAMESPACE` - Storage key prefix (default: `portal_cache_`)
    /// - `CACHE_VERSION` - Cache format version (default: `1`)
    /// - `CACHE_CAPACITY_BYTES` - Store ceiling (default: 10 MiB)
    /// - `STORAGE_QUOTA_BYTES` - Displayed quota (default: 50 MiB)
    /// - `COMPRESSION_THRESHOLD` - Compress above this size (default: 1024)
    /// - `DEFAULT_CACHE_DURATION_MS` - Query cache duration (default: 300000)
    /// - `RETRY_MAX_RETRIES` - Retries after the first attempt (default: 3)
    /// - `RETRY_INITIAL_DELAY_MS` - First backoff delay (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` - Backoff ceiling (default: 10000)
    /// - `RETRY_BACKOFF_FACTOR` - Backoff multiplier (default: 2.0)
    /// - `MAINTENANCE_ENABLED` - Run maintenance rules on timers (default: true)
    /// - `MAINTENANCE_HISTORY_LIMIT` - Events kept for display (default: 50)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("CACHE_NAMESPACE").unwrap_or(defaults.namespace),
            cache_version: env::var("CACHE_VERSION").unwrap_or(defaults.cache_version),
            capacity_bytes: env_or("CACHE_CAPACITY_BYTES", defaults.capacity_bytes),
            storage_quota_bytes: env_or("STORAGE_QUOTA_BYTES", defaults.storage_quota_bytes),
            compression_threshold: env_or("COMPRESSION_THRESHOLD", defaults.compression_threshold),
            default_cache_duration: Duration::from_millis(env_or(
                "DEFAULT_CACHE_DURATION_MS",
                defaults.default_cache_duration.as_millis() as u64,
            )),
            retry: RetryConfig {
                max_retries: env_or("RETRY_MAX_RETRIES", defaults.retry.max_retries),
                initial_delay: Duration::from_millis(env_or(
                    "RETRY_INITIAL_DELAY_MS",
                    defaults.retry.initial_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(env_or(
                    "RETRY_MAX_DELAY_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )),
                backoff_factor: env_or("RETRY_BACKOFF_FACTOR", defaults.retry.backoff_factor),
            },
            maintenance_enabled: env_or("MAINTENANCE_ENABLED", defaults.maintenance_enabled),
            maintenance_history_limit: env_or(
                "MAINTENANCE_HISTORY_LIMIT",
                defaults.maintenance_history_limit,
            ),
            server_port: env_or("SERVER_PORT", defaults.server_port),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "portal_cache_".to_string(),
            cache_version: "1".to_string(),
            capacity_bytes: 10 * 1024 * 1024,
            storage_quota_bytes: 50 * 1024 * 1024,
            compression_threshold: 1024,
            default_cache_duration: Duration::from_secs(300),
            retry: RetryConfig::default(),
            maintenance_enabled: true,
            maintenance_history_limit: 50,
            server_port: 3000,
        }
    }
}

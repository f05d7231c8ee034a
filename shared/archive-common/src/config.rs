//! Configuration for the event archive
//!
//! The same settings can come from a properties map (for embedding) or from
//! `ARCHIVE_*` environment variables, with a `.env` file honoured when present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use tracing::warn;

use crate::error::ArchiveError;
use crate::types::StoreBackend;
use crate::Result;

/// Prefix of every environment variable read by [`ArchiveConfig::from_env`]
pub const ENV_PREFIX: &str = "ARCHIVE_";

/// DuckDB path that selects an in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    // Store selection
    /// Which backend the archive writes to
    pub backend: StoreBackend,

    // DuckDB settings
    /// Database file, or `:memory:`
    pub duckdb_path: String,
    /// Memory limit in MB for the connection
    pub duckdb_memory_limit_mb: usize,
    /// Number of DuckDB worker threads
    pub duckdb_threads: usize,

    // Redis settings
    pub redis_url: String,
    /// Namespace for every key the document backend writes
    pub redis_key_prefix: String,

    // Chain access
    pub rpc_url: String,
    pub rpc_timeout_secs: u64,
    pub explorer_url: String,
    pub explorer_api_key: String,
    /// Attempts per explorer call before the error is surfaced
    pub explorer_max_retries: u32,
    /// Fixed wait between explorer attempts
    pub explorer_retry_wait_ms: u64,

    // Bounded caches
    pub abi_cache_size: usize,
    pub address_cache_size: usize,
    pub block_cache_size: usize,

    /// Default sub-range width for time-based ingestion
    pub default_batch_freq_secs: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Relational,
            duckdb_path: "archive.duckdb".to_string(),
            duckdb_memory_limit_mb: 1024,
            duckdb_threads: 2,
            redis_url: "redis://localhost:6379".to_string(),
            redis_key_prefix: "archive".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            rpc_timeout_secs: 30,
            explorer_url: "https://api.etherscan.io/api".to_string(),
            explorer_api_key: String::new(),
            explorer_max_retries: 5,
            explorer_retry_wait_ms: 1001,
            abi_cache_size: 128,
            address_cache_size: 4096,
            block_cache_size: 10_000,
            default_batch_freq_secs: 3600,
        }
    }
}

impl ArchiveConfig {
    /// Load configuration from a properties map
    ///
    /// Keys are the lowercase variable names without prefix: `backend`,
    /// `duckdb_path`, `duckdb_memory_limit_mb`, `duckdb_threads`, `redis_url`,
    /// `redis_key_prefix`, `rpc_url`, `rpc_timeout_secs`, `explorer_url`,
    /// `explorer_api_key`, `explorer_max_retries`, `explorer_retry_wait_ms`,
    /// `abi_cache_size`, `address_cache_size`, `block_cache_size`,
    /// `default_batch_freq_secs`.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let backend = match props.get("backend") {
            Some(v) => v.parse()?,
            None => defaults.backend,
        };

        let config = Self {
            backend,
            duckdb_path: props
                .get("duckdb_path")
                .cloned()
                .unwrap_or(defaults.duckdb_path),
            duckdb_memory_limit_mb: parse_or(props, "duckdb_memory_limit_mb", defaults.duckdb_memory_limit_mb),
            duckdb_threads: parse_or(props, "duckdb_threads", defaults.duckdb_threads),
            redis_url: props.get("redis_url").cloned().unwrap_or(defaults.redis_url),
            redis_key_prefix: props
                .get("redis_key_prefix")
                .cloned()
                .unwrap_or(defaults.redis_key_prefix),
            rpc_url: props.get("rpc_url").cloned().unwrap_or(defaults.rpc_url),
            rpc_timeout_secs: parse_or(props, "rpc_timeout_secs", defaults.rpc_timeout_secs),
            explorer_url: props
                .get("explorer_url")
                .cloned()
                .unwrap_or(defaults.explorer_url),
            explorer_api_key: props
                .get("explorer_api_key")
                .cloned()
                .unwrap_or(defaults.explorer_api_key),
            explorer_max_retries: parse_or(props, "explorer_max_retries", defaults.explorer_max_retries),
            explorer_retry_wait_ms: parse_or(props, "explorer_retry_wait_ms", defaults.explorer_retry_wait_ms),
            abi_cache_size: parse_or(props, "abi_cache_size", defaults.abi_cache_size),
            address_cache_size: parse_or(props, "address_cache_size", defaults.address_cache_size),
            block_cache_size: parse_or(props, "block_cache_size", defaults.block_cache_size),
            default_batch_freq_secs: parse_or(props, "default_batch_freq_secs", defaults.default_batch_freq_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `ARCHIVE_*` environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let props: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|rest| (rest.to_ascii_lowercase(), value))
            })
            .collect();

        Self::from_properties(&props)
    }

    pub fn validate(&self) -> Result<()> {
        if self.abi_cache_size == 0 || self.address_cache_size == 0 || self.block_cache_size == 0 {
            return Err(ArchiveError::ConfigError(
                "cache sizes must be greater than 0".to_string(),
            ));
        }
        if self.default_batch_freq_secs <= 0 {
            return Err(ArchiveError::ConfigError(
                "default_batch_freq_secs must be positive".to_string(),
            ));
        }
        if self.explorer_max_retries == 0 {
            return Err(ArchiveError::ConfigError(
                "explorer_max_retries must be at least 1".to_string(),
            ));
        }
        if self.explorer_api_key.is_empty() {
            warn!("No explorer API key configured, explorer calls will be heavily rate limited");
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.duckdb_path == IN_MEMORY_PATH
    }

    pub fn default_batch_freq(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_batch_freq_secs)
    }
}

fn parse_or<T: std::str::FromStr>(props: &HashMap<String, String>, key: &str, default: T) -> T {
    props
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_properties() {
        let config = ArchiveConfig::from_properties(&HashMap::new()).unwrap();
        assert_eq!(config.backend, StoreBackend::Relational);
        assert_eq!(config.explorer_max_retries, 5);
        assert_eq!(config.default_batch_freq(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_properties_override_defaults() {
        let mut props = HashMap::new();
        props.insert("backend".to_string(), "redis".to_string());
        props.insert("duckdb_path".to_string(), ":memory:".to_string());
        props.insert("abi_cache_size".to_string(), "16".to_string());
        props.insert("rpc_timeout_secs".to_string(), "not-a-number".to_string());

        let config = ArchiveConfig::from_properties(&props).unwrap();
        assert_eq!(config.backend, StoreBackend::Document);
        assert!(config.is_in_memory());
        assert_eq!(config.abi_cache_size, 16);
        assert_eq!(config.rpc_timeout_secs, 30);
    }

    #[test]
    fn test_zero_cache_rejected() {
        let mut props = HashMap::new();
        props.insert("block_cache_size".to_string(), "0".to_string());
        assert!(matches!(
            ArchiveConfig::from_properties(&props),
            Err(ArchiveError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut props = HashMap::new();
        props.insert("backend".to_string(), "csv".to_string());
        assert!(ArchiveConfig::from_properties(&props).is_err());
    }
}

//! Configuration for the wallet ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Engine configuration
    pub engine: EngineConfig,

    /// Reconciler configuration
    pub reconciler: ReconcilerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallet-ledger"),
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            cache: CacheConfig::default(),
            engine: EngineConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default entry time-to-live (seconds)
    pub default_ttl_secs: u64,

    /// Key prefix for all cached entries
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600, // 1 hour
            key_prefix: "xrw:".to_string(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry bound for revision-gated wallet writes
    pub max_write_retries: u32,

    /// Default limit for transaction history queries
    pub default_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_write_retries: 5,
            default_history_limit: 50,
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Enable the background reconciliation task
    pub enabled: bool,

    /// Scan interval (seconds)
    pub interval_secs: u64,

    /// Pending transactions older than this are failed (seconds)
    pub max_pending_age_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            max_pending_age_secs: 300, // 5 minutes
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WALLET_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ttl) = std::env::var("WALLET_LEDGER_CACHE_TTL_SECS") {
            config.cache.default_ttl_secs = ttl
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid cache TTL: {}", e)))?;
        }

        if let Ok(age) = std::env::var("WALLET_LEDGER_MAX_PENDING_AGE_SECS") {
            config.reconciler.max_pending_age_secs = age
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid pending age: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "wallet-ledger");
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert!(config.reconciler.enabled);
        assert!(config.engine.max_write_retries > 0);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            data_dir = "/tmp/ledger"
            service_name = "wallet-ledger"
            service_version = "0.1.0"

            [rocksdb]
            write_buffer_size_mb = 64
            max_write_buffer_number = 2
            target_file_size_mb = 64
            max_background_jobs = 2
            enable_statistics = false

            [cache]
            default_ttl_secs = 120
            key_prefix = "xrw:"

            [engine]
            max_write_retries = 3
            default_history_limit = 25

            [reconciler]
            enabled = false
            interval_secs = 30
            max_pending_age_secs = 60
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.default_ttl_secs, 120);
        assert_eq!(config.engine.max_write_retries, 3);
        assert!(!config.reconciler.enabled);
    }
}

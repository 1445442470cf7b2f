//! Configuration for queues, caches and bloom filters
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`SPILLWAY_*`, `__` separates sections)
//! 2. Configuration file (`spillway.toml`)
//! 3. Default values

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use spillstore::{Database, Error, Result, SerializationStrategy};

use crate::bloom::GrowthMode;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SPILLWAY_";

/// Disk tier location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory; a temporary directory is used when unset
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Open the configured database
    pub fn open_database(&self) -> Result<Arc<Database>> {
        let db = match &self.dir {
            Some(dir) => Database::open(dir)?,
            None => Database::temporary()?,
        };
        Ok(Arc::new(db))
    }
}

/// Queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Items kept in memory before spilling to disk
    pub max_in_memory: usize,
    /// Name used in log lines
    pub name: String,
    /// Encoding of spilled items
    pub serialization: SerializationStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_in_memory: 10,
            name: "queue".to_string(),
            serialization: SerializationStrategy::default(),
        }
    }
}

/// Frequency cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keys kept in memory
    pub max_in_memory: usize,
    /// Prefix of the disk table name
    pub table_prefix: String,
    /// Encoding of keys and values on disk
    pub serialization: SerializationStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_in_memory: 50,
            table_prefix: "cached_disk_dict".to_string(),
            serialization: SerializationStrategy::default(),
        }
    }
}

/// Scalable bloom filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Capacity of the first sub-filter
    pub initial_capacity: u64,
    /// Target false positive rate
    pub error_rate: f64,
    /// Growth of each new sub-filter
    pub growth: GrowthMode,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 10_000,
            error_rate: 0.001,
            growth: GrowthMode::SmallSet,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillwayConfig {
    /// Disk tier
    pub storage: StorageConfig,
    /// Queues
    pub queue: QueueConfig,
    /// Frequency caches
    pub cache: CacheConfig,
    /// Bloom filters
    pub bloom: BloomConfig,
}

impl SpillwayConfig {
    /// Load defaults, then `spillway.toml` from the working directory if
    /// present, then environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from_path("spillway.toml")
    }

    /// Load defaults, then the given TOML file if present, then environment
    /// variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string on top of the defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_in_memory == 0 {
            return Err(Error::Config(
                "queue.max_in_memory must be greater than zero".to_string(),
            ));
        }
        if self.queue.name.trim().is_empty() {
            return Err(Error::Config("queue.name must not be empty".to_string()));
        }
        if self.cache.max_in_memory == 0 {
            return Err(Error::Config(
                "cache.max_in_memory must be greater than zero".to_string(),
            ));
        }
        if self.cache.table_prefix.is_empty()
            || !self
                .cache
                .table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "cache.table_prefix '{}' must be non-empty [A-Za-z0-9_]",
                self.cache.table_prefix
            )));
        }
        if self.bloom.initial_capacity == 0 {
            return Err(Error::Config(
                "bloom.initial_capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.bloom.error_rate > 0.0 && self.bloom.error_rate < 1.0) {
            return Err(Error::Config(format!(
                "bloom.error_rate {} must be between 0 and 1 (exclusive)",
                self.bloom.error_rate
            )));
        }
        Ok(())
    }
}

//! Configuration for cachefield.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::CacheFieldResult;

/// Main configuration for cachefield.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Record store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Recalculation defaults.
    #[serde(default)]
    pub recalculation: RecalculationConfig,

    /// Task queue and worker settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Record kinds and their cached attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<KindConfig>,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".cachefield/cachefield.db")
}

/// Recalculation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationConfig {
    /// Whether flagging an attribute as stale enqueues a recalculation job
    /// when the attribute does not say otherwise.
    #[serde(default = "default_true")]
    pub eager_default: bool,
}

impl Default for RecalculationConfig {
    fn default() -> Self {
        Self {
            eager_default: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Task queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// In-process channel capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum number of jobs processed concurrently by one worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delivery attempts before a job is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds a claimed durable job stays invisible to other workers.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Idle poll interval for durable queues (in milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delay before a failed job is retried (in milliseconds).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_capacity() -> usize {
    1024
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_visibility_timeout() -> u64 {
    300 // 5 minutes
}

fn default_poll_interval() -> u64 {
    500
}

fn default_retry_backoff() -> u64 {
    200
}

/// A record kind with cached attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    /// Store-kind identifier (the application the kind belongs to).
    pub store: String,

    /// Record-kind identifier.
    pub name: String,

    /// Table name (default: `<store>_<name>`, lowercased).
    #[serde(default)]
    pub table: Option<String>,

    /// Cached attributes defined on this kind.
    #[serde(default)]
    pub attributes: Vec<AttributeOptions>,
}

/// Options recognized for one cached attribute.
///
/// Every column name has a default derived from `name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeOptions {
    /// Attribute identifier.
    pub name: String,

    /// Compute method that supplies the value (default: `calculate_<name>`).
    #[serde(default)]
    pub compute_method_name: Option<String>,

    /// Column holding the cached value (default: `cached_<name>`).
    #[serde(default)]
    pub storage_column_name: Option<String>,

    /// Boolean stale flag column (default: `<name>_recalculation_needed`).
    #[serde(default)]
    pub stale_flag_column_name: Option<String>,

    /// Enables expiration-based staleness.
    #[serde(default)]
    pub temporal_triggers: bool,

    /// Expiration column (default: `<name>_expires_after`).
    #[serde(default)]
    pub expiration_column_name: Option<String>,

    /// Whether flag_as_stale enqueues by default (falls back to
    /// `recalculation.eager_default`).
    #[serde(default)]
    pub eager_recalculation_default: Option<bool>,

    /// SQL type of the storage column, used when adding missing columns.
    #[serde(default)]
    pub column_type: Option<String>,
}

impl AttributeOptions {
    /// Creates options with every name left at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> CacheFieldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CacheFieldResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Creates default configuration.
    pub fn default_config() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            recalculation: RecalculationConfig::default(),
            queue: QueueConfig::default(),
            kinds: Vec::new(),
        }
    }

    /// Tries to load configuration from current directory or uses default.
    pub fn load_or_default() -> Self {
        Self::load("cachefield.toml").unwrap_or_else(|_| Self::default_config())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

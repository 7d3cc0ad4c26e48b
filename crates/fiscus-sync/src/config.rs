//! # Engine Configuration
//!
//! Configuration management for the cache and sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FISCUS_MAX_ENTRIES=5000                                            │
//! │     FISCUS_NETWORK_POLICY=network_first                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fiscus/engine.toml (Linux)                               │
//! │     ~/Library/Application Support/com.fiscus.sdk/engine.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [cache]
//! max_entries = 1000
//! max_size_bytes = 52428800
//! compression_threshold = 1024
//! default_ttl_ms = 300000
//! ttl_strategy = "sliding"      # sliding | absolute | adaptive
//! eviction_policy = "lru"       # lru | lfu | fifo | random
//! checksum = "sha256"           # sha256 | crc32
//!
//! [persistence]
//! namespace = "fiscus"
//! debounce_ms = 1000
//! max_wait_ms = 10000           # cap on how long a busy cache defers saving
//!
//! [query]
//! network_policy = "cache_first"
//! max_retries = 3
//!
//! [mutation]
//! enable_offline_queue = true
//! rollback_on_error = true
//! optimistic_timeout_ms = 30000
//!
//! [queue]
//! max_retries = 5
//! replay_interval_secs = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use fiscus_cache::StoreConfig;
use fiscus_core::{ChecksumAlgorithm, EvictionPolicy, NetworkPolicy, TtlStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Cache Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Entries at least this large are compressed when the caller asks for it.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: u64,

    /// TTL for entries written without one. `None` = never expire.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: Option<u64>,

    /// Base of the adaptive TTL cap (2 × this value).
    #[serde(default = "default_cache_time_ms")]
    pub cache_time_default_ms: u64,

    #[serde(default)]
    pub ttl_strategy: TtlStrategy,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Interval of the background GC pass (seconds).
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    /// Checksums and access timing.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    #[serde(default)]
    pub checksum: ChecksumAlgorithm,
}

fn default_max_entries() -> usize {
    1000
}
fn default_max_size_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_compression_threshold() -> u64 {
    1024
}
fn default_ttl_ms() -> Option<u64> {
    Some(fiscus_core::DEFAULT_CACHE_TIME_MS)
}
fn default_cache_time_ms() -> u64 {
    fiscus_core::DEFAULT_CACHE_TIME_MS
}
fn default_gc_interval() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            max_entries: default_max_entries(),
            max_size_bytes: default_max_size_bytes(),
            compression_threshold: default_compression_threshold(),
            default_ttl_ms: default_ttl_ms(),
            cache_time_default_ms: default_cache_time_ms(),
            ttl_strategy: TtlStrategy::default(),
            eviction_policy: EvictionPolicy::default(),
            gc_interval_secs: default_gc_interval(),
            enable_metrics: true,
            checksum: ChecksumAlgorithm::default(),
        }
    }
}

impl CacheSettings {
    /// Builds the entry store configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            compression_threshold: self.compression_threshold,
            default_ttl_ms: self.default_ttl_ms,
            default_ttl_strategy: self.ttl_strategy,
            cache_time_default_ms: self.cache_time_default_ms,
            eviction_policy: self.eviction_policy,
            enable_metrics: self.enable_metrics,
            checksum_algorithm: self.checksum,
        }
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

// =============================================================================
// Persistence Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Snapshot the cache into the durable store.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix of every durable key this engine writes.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Quiet period before a snapshot is written (milliseconds).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Longest a pending snapshot may be deferred by continuous writes
    /// (milliseconds).
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_namespace() -> String {
    "fiscus".to_string()
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_max_wait_ms() -> u64 {
    10_000
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        PersistenceSettings {
            enabled: true,
            namespace: default_namespace(),
            debounce_ms: default_debounce_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl PersistenceSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

// =============================================================================
// Query Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    #[serde(default)]
    pub network_policy: NetworkPolicy,

    /// Retries after the first failed fetch.
    #[serde(default = "default_query_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

fn default_query_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_retry_max_delay() -> u64 {
    30_000
}

impl Default for QuerySettings {
    fn default() -> Self {
        QuerySettings {
            network_policy: NetworkPolicy::default(),
            max_retries: default_query_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

// =============================================================================
// Mutation Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationSettings {
    /// Queue writes that cannot be delivered instead of failing them.
    #[serde(default = "default_true")]
    pub enable_offline_queue: bool,

    /// Restore the pre-mutation cache state when a write fails for good.
    #[serde(default = "default_true")]
    pub rollback_on_error: bool,

    /// Revert an unresolved optimistic projection after this long (milliseconds).
    #[serde(default = "default_optimistic_timeout")]
    pub optimistic_timeout_ms: u64,

    /// Online retries before a write is treated as failed.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_optimistic_timeout() -> u64 {
    30_000
}

impl Default for MutationSettings {
    fn default() -> Self {
        MutationSettings {
            enable_offline_queue: true,
            rollback_on_error: true,
            optimistic_timeout_ms: default_optimistic_timeout(),
            max_retries: 0,
        }
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Retries after the first failed replay before a queued mutation is
    /// dropped as exhausted.
    #[serde(default = "default_queue_retries")]
    pub max_retries: u32,

    #[serde(default = "default_replay_interval")]
    pub replay_interval_secs: u64,
}

fn default_queue_retries() -> u32 {
    5
}
fn default_replay_interval() -> u64 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_retries: default_queue_retries(),
            replay_interval_secs: default_replay_interval(),
        }
    }
}

impl QueueSettings {
    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.replay_interval_secs)
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub mutation: MutationSettings,

    #[serde(default)]
    pub queue: QueueSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cache.max_entries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_entries must be greater than 0".into(),
            ));
        }

        if self.cache.max_size_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "max_size_bytes must be greater than 0".into(),
            ));
        }

        if self.cache.default_ttl_ms == Some(0) {
            return Err(SyncError::InvalidConfig(
                "default_ttl_ms must be greater than 0".into(),
            ));
        }

        if self.query.retry_base_delay_ms > self.query.retry_max_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.query.retry_base_delay_ms, self.query.retry_max_delay_ms
            )));
        }

        if self.persistence.namespace.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "persistence namespace must not be empty".into(),
            ));
        }

        if self.persistence.max_wait_ms < self.persistence.debounce_ms {
            return Err(SyncError::InvalidConfig(format!(
                "max_wait_ms ({}) is shorter than debounce_ms ({})",
                self.persistence.max_wait_ms, self.persistence.debounce_ms
            )));
        }

        if self.queue.replay_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "replay_interval_secs must be greater than 0".into(),
            ));
        }

        if self.cache.gc_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "gc_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FISCUS_MAX_ENTRIES") {
            match value.parse::<usize>() {
                Ok(n) => {
                    debug!(max_entries = n, "Overriding max entries from environment");
                    self.cache.max_entries = n;
                }
                Err(_) => warn!(value = %value, "Invalid FISCUS_MAX_ENTRIES"),
            }
        }

        if let Some(value) = lookup("FISCUS_MAX_SIZE_BYTES") {
            match value.parse::<u64>() {
                Ok(n) => self.cache.max_size_bytes = n,
                Err(_) => warn!(value = %value, "Invalid FISCUS_MAX_SIZE_BYTES"),
            }
        }

        if let Some(value) = lookup("FISCUS_EVICTION_POLICY") {
            match value.parse() {
                Ok(policy) => {
                    debug!(policy = %value, "Overriding eviction policy from environment");
                    self.cache.eviction_policy = policy;
                }
                Err(e) => warn!(error = %e, "Ignoring FISCUS_EVICTION_POLICY"),
            }
        }

        if let Some(value) = lookup("FISCUS_TTL_STRATEGY") {
            match value.parse() {
                Ok(strategy) => self.cache.ttl_strategy = strategy,
                Err(e) => warn!(error = %e, "Ignoring FISCUS_TTL_STRATEGY"),
            }
        }

        if let Some(value) = lookup("FISCUS_NETWORK_POLICY") {
            match value.parse() {
                Ok(policy) => {
                    debug!(policy = %value, "Overriding network policy from environment");
                    self.query.network_policy = policy;
                }
                Err(e) => warn!(error = %e, "Ignoring FISCUS_NETWORK_POLICY"),
            }
        }

        if let Some(value) = lookup("FISCUS_OFFLINE_QUEUE") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.mutation.enable_offline_queue = true,
                "0" | "false" | "no" | "off" => self.mutation.enable_offline_queue = false,
                _ => warn!(value = %value, "Invalid FISCUS_OFFLINE_QUEUE"),
            }
        }

        if let Some(value) = lookup("FISCUS_PERSISTENCE_NAMESPACE") {
            self.persistence.namespace = value;
        }

        if let Some(value) = lookup("FISCUS_CHECKSUM") {
            match value.parse() {
                Ok(algorithm) => self.cache.checksum = algorithm,
                Err(e) => warn!(error = %e, "Ignoring FISCUS_CHECKSUM"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fiscus", "sdk")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}

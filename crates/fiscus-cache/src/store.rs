//! # Entry Store
//!
//! The keyed container at the bottom of the data layer. It knows nothing
//! about networks or durable storage.
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EntryStore                                      │
//! │                                                                         │
//! │  set(key, value, opts)                                                 │
//! │    1. validate key + ttl                                               │
//! │    2. canonical bytes → size, checksum (if metrics enabled)            │
//! │    3. compress if requested and size ≥ threshold, keep if smaller      │
//! │    4. entry fully built BEFORE the store is touched                    │
//! │    5. drop old entry under key, evict until the new one fits           │
//! │    6. insert, recompute metrics                                        │
//! │                                                                         │
//! │  get(key)                                                              │
//! │    miss ─────────────────────────────────────────────► None (miss)     │
//! │    expired under its strategy ─► remove ─────────────► None (miss)     │
//! │    touch (access_count++, last_accessed_at = now)                      │
//! │    decode + verify checksum                                            │
//! │       └─ failure ─► remove (corruption) ─────────────► None (miss)     │
//! │    ──────────────────────────────────────────────────► Some (hit)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Corruption is never surfaced as an error from a read; a corrupted entry is
//! indistinguishable from a miss to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use fiscus_core::validation::{validate_key, validate_ttl};
use fiscus_core::{
    CacheEntry, CacheMetrics, ChecksumAlgorithm, EntryPriority, EvictionPolicy, Payload,
    SharedClock, SystemClock, TtlStrategy, DEFAULT_CACHE_TIME_MS, IDLE_ENTRY_THRESHOLD_MS,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::codec::{self, Codec, DeflateCodec};
use crate::error::{CacheError, CacheResult};
use crate::eviction::EvictionEngine;
use crate::metrics::MetricsRecorder;

// =============================================================================
// Configuration
// =============================================================================

/// Capacity and behaviour limits for an [`EntryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_entries: usize,
    pub max_size_bytes: u64,
    /// Entries at least this large are compressed when the caller asks for it.
    pub compression_threshold: u64,
    /// TTL applied when `set` does not specify one. `None` = never expires.
    pub default_ttl_ms: Option<u64>,
    pub default_ttl_strategy: TtlStrategy,
    /// Base of the adaptive TTL cap.
    pub cache_time_default_ms: u64,
    pub eviction_policy: EvictionPolicy,
    /// Turns on checksums and latency tracking.
    pub enable_metrics: bool,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_entries: 1000,
            max_size_bytes: 50 * 1024 * 1024,
            compression_threshold: 1024,
            default_ttl_ms: Some(DEFAULT_CACHE_TIME_MS),
            default_ttl_strategy: TtlStrategy::Sliding,
            cache_time_default_ms: DEFAULT_CACHE_TIME_MS,
            eviction_policy: EvictionPolicy::Lru,
            enable_metrics: true,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
        }
    }
}

/// Per-call options for [`EntryStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl_ms: Option<u64>,
    pub ttl_strategy: Option<TtlStrategy>,
    pub priority: EntryPriority,
    pub tags: Vec<String>,
    pub compress: bool,
    /// Store without any TTL, overriding the store default.
    pub no_expiry: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn strategy(mut self, strategy: TtlStrategy) -> Self {
        self.ttl_strategy = Some(strategy);
        self
    }

    pub fn priority(mut self, priority: EntryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn no_expiry(mut self) -> Self {
        self.no_expiry = true;
        self
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// Keys removed to make room, in eviction order.
    pub evicted: Vec<String>,
    pub compressed: bool,
}

/// Detailed result of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Value),
    Miss,
    /// The entry was past its TTL and has been removed. `stale` holds its
    /// last value for callers that accept stale data.
    Expired { stale: Option<Value> },
    Corrupted,
}

impl Lookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub expired: Vec<String>,
    /// Removed by the idle safety valve.
    pub idle: Vec<String>,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.expired.len() + self.idle.len()
    }
}

/// Why a persisted entry was or was not admitted on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { evicted: Vec<String> },
    Expired,
    Corrupt(String),
}

// =============================================================================
// Entry Store
// =============================================================================

pub struct EntryStore {
    config: StoreConfig,
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    next_seq: u64,
    codec: Arc<dyn Codec>,
    clock: SharedClock,
    eviction: EvictionEngine,
    metrics: MetricsRecorder,
}

impl EntryStore {
    pub fn new(config: StoreConfig, codec: Arc<dyn Codec>, clock: SharedClock) -> Self {
        let eviction = EvictionEngine::new(config.eviction_policy);
        EntryStore {
            config,
            entries: HashMap::new(),
            total_bytes: 0,
            next_seq: 0,
            codec,
            clock,
            eviction,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Store with the DEFLATE codec and the system clock.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::new(config, Arc::new(DeflateCodec::default()), SystemClock::shared())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts or replaces the value under `key`.
    pub fn set(&mut self, key: &str, value: Value, opts: SetOptions) -> CacheResult<SetOutcome> {
        validate_key(key)?;
        validate_ttl(opts.ttl_ms)?;

        let now = self.clock.now_ms();
        let bytes = codec::canonical_bytes(&value)?;
        let raw_size = bytes.len() as u64;

        let checksum = self
            .config
            .enable_metrics
            .then(|| codec::checksum(self.config.checksum_algorithm, &bytes));

        let mut compressed = false;
        let mut original_size = None;
        let (payload, size_bytes) =
            if opts.compress && raw_size >= self.config.compression_threshold {
                match codec::compress_bytes(self.codec.as_ref(), &bytes) {
                    Ok(c) if c.is_worthwhile() => {
                        compressed = true;
                        original_size = Some(c.original_size);
                        (Payload::Compressed(c.encoded), c.encoded_size)
                    }
                    Ok(_) => (Payload::Raw(value), raw_size),
                    Err(e) => {
                        warn!(key = %key, codec = self.codec.name(), ?e, "Compression failed, storing raw");
                        (Payload::Raw(value), raw_size)
                    }
                }
            } else {
                (Payload::Raw(value), raw_size)
            };

        let ttl = if opts.no_expiry {
            None
        } else {
            opts.ttl_ms.or(self.config.default_ttl_ms)
        };
        let strategy = opts
            .ttl_strategy
            .unwrap_or(self.config.default_ttl_strategy);

        let mut entry = CacheEntry::new(key, payload, now, size_bytes)
            .with_ttl(ttl, strategy)
            .with_priority(opts.priority)
            .with_tags(opts.tags)
            .with_checksum(checksum);
        if let Some(original) = original_size {
            entry = entry.with_original_size(original);
        }
        entry.seq = self.take_seq();

        self.remove_entry(key);
        let evicted = self.make_room(size_bytes);
        self.insert_entry(entry);
        self.refresh_metrics();

        trace!(key = %key, size_bytes, compressed, "Cache set");
        Ok(SetOutcome { evicted, compressed })
    }

    /// Puts a previously captured entry back exactly as it was.
    pub fn restore(&mut self, entry: CacheEntry) -> Vec<String> {
        self.next_seq = self.next_seq.max(entry.seq.saturating_add(1));
        self.remove_entry(&entry.key);
        let evicted = self.make_room(entry.size_bytes);
        self.insert_entry(entry);
        self.refresh_metrics();
        evicted
    }

    /// Admits an entry read back from durable storage after checking its TTL
    /// and integrity.
    pub fn admit(&mut self, mut entry: CacheEntry) -> Admission {
        if let Err(e) = validate_key(&entry.key) {
            return Admission::Corrupt(e.to_string());
        }

        let now = self.clock.now_ms();
        if entry.is_expired(now, self.config.cache_time_default_ms) {
            return Admission::Expired;
        }

        if let Err(e) = decode_entry(self.codec.as_ref(), &entry) {
            return Admission::Corrupt(e.to_string());
        }

        // Stored size is re-derived, never trusted from disk
        entry.size_bytes = match &entry.payload {
            Payload::Compressed(bytes) => bytes.len() as u64,
            Payload::Raw(value) => match codec::canonical_bytes(value) {
                Ok(bytes) => bytes.len() as u64,
                Err(e) => return Admission::Corrupt(e.to_string()),
            },
        };
        entry.is_compressed = matches!(entry.payload, Payload::Compressed(_));
        entry.seq = self.take_seq();

        self.remove_entry(&entry.key);
        let evicted = self.make_room(entry.size_bytes);
        self.insert_entry(entry);
        self.refresh_metrics();
        Admission::Admitted { evicted }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key).is_some();
        if removed {
            self.refresh_metrics();
        }
        removed
    }

    /// Removes everything. Returns the number of entries dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        self.refresh_metrics();
        count
    }

    /// Removes every key starting with `prefix`, or everything when `None`.
    ///
    /// Matching is a plain string prefix, not a glob.
    pub fn invalidate(&mut self, prefix: Option<&str>) -> Vec<String> {
        let mut keys: Vec<String> = match prefix {
            None => self.entries.keys().cloned().collect(),
            Some(p) => self
                .entries
                .keys()
                .filter(|k| k.starts_with(p))
                .cloned()
                .collect(),
        };
        keys.sort();
        self.remove_keys(&keys);
        keys
    }

    /// Removes every entry carrying `tag`.
    pub fn invalidate_tag(&mut self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.has_tag(tag))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        self.remove_keys(&keys);
        keys
    }

    /// Drops expired entries and, once the store is over its entry limit,
    /// entries nobody has read for an hour.
    pub fn gc(&mut self) -> GcReport {
        let now = self.clock.now_ms();
        let cache_time = self.config.cache_time_default_ms;

        let mut report = GcReport::default();
        report.expired = self
            .entries
            .values()
            .filter(|e| e.is_expired(now, cache_time))
            .map(|e| e.key.clone())
            .collect();
        for key in &report.expired {
            self.remove_entry(key);
            self.metrics.record_expiration();
        }

        if self.entries.len() > self.config.max_entries {
            report.idle = self
                .entries
                .values()
                .filter(|e| e.idle_for(now) > IDLE_ENTRY_THRESHOLD_MS)
                .map(|e| e.key.clone())
                .collect();
            for key in &report.idle {
                self.remove_entry(key);
            }
        }

        report.expired.sort();
        report.idle.sort();
        self.refresh_metrics();

        if report.total() > 0 {
            debug!(
                expired = report.expired.len(),
                idle = report.idle.len(),
                remaining = self.entries.len(),
                "Cache GC pass"
            );
        }
        report
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.lookup(key).into_value()
    }

    /// Reads `key`, updating access stats and hit/miss metrics.
    pub fn lookup(&mut self, key: &str) -> Lookup {
        let started = Instant::now();
        let now = self.clock.now_ms();

        let expired = match self.entries.get(key) {
            None => {
                self.metrics.record_miss(started.elapsed());
                self.refresh_metrics();
                return Lookup::Miss;
            }
            Some(entry) => entry.is_expired(now, self.config.cache_time_default_ms),
        };

        if expired {
            trace!(key = %key, "Entry expired on read");
            let stale = self
                .entries
                .get(key)
                .and_then(|entry| decode_entry(self.codec.as_ref(), entry).ok());
            self.remove_entry(key);
            self.metrics.record_expiration();
            self.metrics.record_miss(started.elapsed());
            self.refresh_metrics();
            return Lookup::Expired { stale };
        }

        let decoded = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                decode_entry(self.codec.as_ref(), entry)
            }
            None => return Lookup::Miss,
        };

        match decoded {
            Ok(value) => {
                self.metrics.record_hit(started.elapsed());
                self.refresh_metrics();
                Lookup::Hit(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Evicting corrupted cache entry");
                self.remove_entry(key);
                self.metrics.record_corruption();
                self.metrics.record_miss(started.elapsed());
                self.refresh_metrics();
                Lookup::Corrupted
            }
        }
    }

    /// Returns the value regardless of expiry, without touching access stats.
    ///
    /// Used for stale fallbacks. A corrupted entry is still evicted.
    pub fn peek_stale(&mut self, key: &str) -> Option<Value> {
        let decoded = decode_entry(self.codec.as_ref(), self.entries.get(key)?);
        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Evicting corrupted cache entry");
                self.remove_entry(key);
                self.metrics.record_corruption();
                self.refresh_metrics();
                None
            }
        }
    }

    /// Returns true if a live (non-expired) entry exists.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now, self.config.cache_time_default_ms))
    }

    /// Raw entry, metadata included.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    /// Clones every entry in insertion order.
    pub fn export(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert_entry(&mut self, entry: CacheEntry) {
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_keys(&mut self, keys: &[String]) {
        for key in keys {
            self.remove_entry(key);
        }
        self.refresh_metrics();
    }

    /// Evicts in rounds until an entry of `incoming_bytes` fits.
    fn make_room(&mut self, incoming_bytes: u64) -> Vec<String> {
        let mut evicted = Vec::new();

        loop {
            let over_count = self.entries.len() >= self.config.max_entries;
            let over_size = self.total_bytes + incoming_bytes > self.config.max_size_bytes;
            if (!over_count && !over_size) || self.entries.is_empty() {
                break;
            }

            let victims = self.eviction.select_victims(self.entries.values());
            for key in victims {
                if self.remove_entry(&key).is_some() {
                    evicted.push(key);
                }
            }
        }

        if !evicted.is_empty() {
            self.metrics.record_evictions(evicted.len());
            debug!(
                policy = %self.eviction.policy(),
                count = evicted.len(),
                entries = self.entries.len(),
                total_bytes = self.total_bytes,
                "Evicted cache entries"
            );
        }
        evicted
    }

    fn refresh_metrics(&mut self) {
        self.metrics.recompute(self.entries.values());
    }
}

/// Decodes an entry's payload and verifies its checksum.
fn decode_entry(codec: &dyn Codec, entry: &CacheEntry) -> CacheResult<Value> {
    let decoded = match &entry.payload {
        // Compressed payloads are checked over the exact bytes that were hashed.
        Payload::Compressed(bytes) => {
            codec::decompress_verified(codec, bytes, entry.checksum.as_ref())
        }
        Payload::Raw(value) => match &entry.checksum {
            Some(expected) => codec::verify_value(expected, value).map(|()| value.clone()),
            None => Ok(value.clone()),
        },
    };
    decoded.map_err(|e| CacheError::corruption(&entry.key, e.to_string()))
}

// =============================================================================
// Unit Tests
// =============================================================================

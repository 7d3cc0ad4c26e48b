//! # Cache Types
//!
//! The keyed cache entry and the policies that govern it.
//!
//! ## Entry Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CacheEntry                                      │
//! │                                                                         │
//! │  key ─────────── "receipt:42"  (resourceType:identifier)               │
//! │  payload ─────── Raw(json) │ Compressed(bytes)                         │
//! │                                                                         │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │ Timing             │  │ Size               │  │ Integrity        │  │
//! │  │ created_at         │  │ size_bytes (stored)│  │ checksum         │  │
//! │  │ last_accessed_at   │  │ original_size_bytes│  │  (sha256|crc32)  │  │
//! │  │ ttl_ms, strategy   │  │ is_compressed      │  │                  │  │
//! │  └────────────────────┘  └────────────────────┘  └──────────────────┘  │
//! │                                                                         │
//! │  access_count • priority • tags • seq (insertion order)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `size_bytes` always describes the stored representation: the compressed
//! length when `is_compressed`, the canonical JSON length otherwise.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// TTL Strategy
// =============================================================================

/// How an entry's `ttl_ms` is interpreted.
///
/// ```text
///  Absolute   expired when now - created_at       >  ttl
///  Sliding    expired when now - last_accessed_at >= ttl   (reads push it out)
///  Adaptive   like Absolute, but ttl × 1.5 (capped at 2 × cache_time_default)
///             once access_count > 10
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TtlStrategy {
    #[default]
    Sliding,
    Absolute,
    Adaptive,
}

impl std::fmt::Display for TtlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtlStrategy::Sliding => write!(f, "sliding"),
            TtlStrategy::Absolute => write!(f, "absolute"),
            TtlStrategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for TtlStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sliding" => Ok(TtlStrategy::Sliding),
            "absolute" | "fixed" => Ok(TtlStrategy::Absolute),
            "adaptive" => Ok(TtlStrategy::Adaptive),
            other => Err(CoreError::unknown(
                "ttl strategy",
                other,
                "sliding, absolute, adaptive",
            )),
        }
    }
}

// =============================================================================
// Eviction Policy
// =============================================================================

/// Which entries go first when the store is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently accessed first.
    #[default]
    Lru,
    /// Least frequently accessed first.
    Lfu,
    /// Oldest inserted first.
    Fifo,
    /// Unweighted random sample.
    Random,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
            EvictionPolicy::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for EvictionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "random" => Ok(EvictionPolicy::Random),
            other => Err(CoreError::unknown(
                "eviction policy",
                other,
                "lru, lfu, fifo, random",
            )),
        }
    }
}

// =============================================================================
// Entry Priority
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntryPriority {
    High,
    #[default]
    Normal,
    Low,
}

// =============================================================================
// Network Policy
// =============================================================================

/// Where a read looks first.
///
/// ```text
///  CacheFirst    memory → durable → network
///  NetworkFirst  network → (memory | durable) as stale fallback
///  OfflineFirst  memory → durable → network, never revalidates in background
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    CacheFirst,
    NetworkFirst,
    OfflineFirst,
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkPolicy::CacheFirst => write!(f, "cache_first"),
            NetworkPolicy::NetworkFirst => write!(f, "network_first"),
            NetworkPolicy::OfflineFirst => write!(f, "offline_first"),
        }
    }
}

impl std::str::FromStr for NetworkPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cache_first" => Ok(NetworkPolicy::CacheFirst),
            "network_first" => Ok(NetworkPolicy::NetworkFirst),
            "offline_first" => Ok(NetworkPolicy::OfflineFirst),
            other => Err(CoreError::unknown(
                "network policy",
                other,
                "cache_first, network_first, offline_first",
            )),
        }
    }
}

// =============================================================================
// Checksums
// =============================================================================

/// Digest used for an entry checksum.
///
/// The two are not interchangeable: a checksum is only ever verified with the
/// algorithm recorded next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// SHA-256, hex encoded.
    #[default]
    Sha256,
    /// CRC-32 (IEEE), hex encoded. Deterministic non-cryptographic fallback.
    Crc32,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Crc32 => write!(f, "crc32"),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            other => Err(CoreError::unknown("checksum algorithm", other, "sha256, crc32")),
        }
    }
}

/// A content digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

// =============================================================================
// Payload
// =============================================================================

/// The stored form of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// The value as-is.
    Raw(Value),
    /// Codec output over the value's canonical JSON bytes.
    Compressed(#[serde(with = "base64_bytes")] Vec<u8>),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// One cached value under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Payload,
    pub created_at: u64,
    pub last_accessed_at: u64,
    /// `None` means the entry never expires by time.
    pub ttl_ms: Option<u64>,
    pub ttl_strategy: TtlStrategy,
    pub access_count: u64,
    pub size_bytes: u64,
    /// Set only when compressed.
    pub original_size_bytes: Option<u64>,
    pub is_compressed: bool,
    pub checksum: Option<Checksum>,
    pub priority: EntryPriority,
    pub tags: BTreeSet<String>,
    /// Store-assigned insertion sequence, used as the eviction tie-break.
    #[serde(default)]
    pub seq: u64,
}

impl CacheEntry {
    /// Creates an entry with default TTL settings (none), normal priority and no tags.
    pub fn new(key: impl Into<String>, payload: Payload, now_ms: u64, size_bytes: u64) -> Self {
        let is_compressed = matches!(payload, Payload::Compressed(_));
        CacheEntry {
            key: key.into(),
            payload,
            created_at: now_ms,
            last_accessed_at: now_ms,
            ttl_ms: None,
            ttl_strategy: TtlStrategy::default(),
            access_count: 0,
            size_bytes,
            original_size_bytes: None,
            is_compressed,
            checksum: None,
            priority: EntryPriority::default(),
            tags: BTreeSet::new(),
            seq: 0,
        }
    }

    /// Creates an uncompressed entry.
    pub fn raw(key: impl Into<String>, value: Value, now_ms: u64, size_bytes: u64) -> Self {
        Self::new(key, Payload::Raw(value), now_ms, size_bytes)
    }

    pub fn with_ttl(mut self, ttl_ms: Option<u64>, strategy: TtlStrategy) -> Self {
        self.ttl_ms = ttl_ms;
        self.ttl_strategy = strategy;
        self
    }

    pub fn with_priority(mut self, priority: EntryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Records the pre-compression size of a compressed payload.
    pub fn with_original_size(mut self, original_size_bytes: u64) -> Self {
        self.original_size_bytes = Some(original_size_bytes);
        self
    }

    /// Returns the TTL in force right now, after any adaptive extension.
    pub fn effective_ttl(&self, cache_time_default_ms: u64) -> Option<u64> {
        let ttl = self.ttl_ms?;
        if self.ttl_strategy == TtlStrategy::Adaptive
            && self.access_count > crate::ADAPTIVE_ACCESS_THRESHOLD
        {
            let extended = ttl.saturating_mul(3) / 2;
            let cap = cache_time_default_ms.saturating_mul(2);
            return Some(extended.min(cap).max(ttl));
        }
        Some(ttl)
    }

    /// Evaluates expiry under the entry's own strategy.
    pub fn is_expired(&self, now_ms: u64, cache_time_default_ms: u64) -> bool {
        let Some(ttl) = self.effective_ttl(cache_time_default_ms) else {
            return false;
        };

        match self.ttl_strategy {
            TtlStrategy::Absolute | TtlStrategy::Adaptive => {
                now_ms.saturating_sub(self.created_at) > ttl
            }
            TtlStrategy::Sliding => now_ms.saturating_sub(self.last_accessed_at) >= ttl,
        }
    }

    /// Records a successful read.
    pub fn touch(&mut self, now_ms: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now_ms;
    }

    /// Milliseconds since the last read (or insertion).
    pub fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_accessed_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # fiscus-core: Pure Types for the Fiscus Data Layer
//!
//! This crate holds every type shared by the cache and sync layers. It has no
//! I/O: no storage, no network, no timers.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscus Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    POS application / SDK caller                 │   │
//! │  │       query(key, fetcher)          mutate(variables)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               fiscus-sync (coordinators, queue)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               fiscus-cache (entry store, persistence)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fiscus-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌────────────┐  │   │
//! │  │   │   types   │  │  mutation  │  │  clock   │  │ validation │  │   │
//! │  │   │CacheEntry │  │QueuedMut.  │  │ System   │  │   keys     │  │   │
//! │  │   │ policies  │  │ statuses   │  │ Manual   │  │   ttl      │  │   │
//! │  │   └───────────┘  └────────────┘  └──────────┘  └────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO STORAGE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Cache entry, payload, checksum and policy enums
//! - [`mutation`] - Queued offline mutations and their lifecycle
//! - [`metrics`] - Aggregate cache metrics snapshot
//! - [`clock`] - Injectable millisecond clock
//! - [`validation`] - Key and TTL validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fiscus_core::{CacheEntry, EntryPriority, TtlStrategy};
//! use serde_json::json;
//!
//! let entry = CacheEntry::raw("receipt:42", json!({"total": 1099}), 1_000, 22)
//!     .with_ttl(Some(100), TtlStrategy::Absolute)
//!     .with_priority(EntryPriority::High);
//!
//! assert!(!entry.is_expired(1_050, 300_000));
//! assert!(entry.is_expired(1_101, 300_000));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod metrics;
pub mod mutation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use metrics::CacheMetrics;
pub use mutation::{
    ConflictPolicy, MutationKind, MutationPriority, MutationStatus, QueuedMutation,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default cache lifetime used when no TTL is given (5 minutes).
///
/// Also the base of the adaptive TTL cap (`2 × cache_time_default`).
pub const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1000;

/// Entries untouched this long are reclaimed by GC once the store is over
/// its entry limit, independent of the eviction policy.
pub const IDLE_ENTRY_THRESHOLD_MS: u64 = 60 * 60 * 1000;

/// Reads above this count earn an adaptive entry its extended lifetime.
pub const ADAPTIVE_ACCESS_THRESHOLD: u64 = 10;

/// Maximum key length accepted by the entry store.
pub const MAX_KEY_LENGTH: usize = 512;

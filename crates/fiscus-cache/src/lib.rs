//! # fiscus-cache: Entry Store & Persistence Layer
//!
//! Owns every cached byte, in memory and in durable storage.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          fiscus-cache                                   │
//! │                                                                         │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────┐  │
//! │  │ CacheHandle  │───►│  EntryStore  │───►│ EvictionEngine           │  │
//! │  │ (shared,     │    │  (sync, one  │    │ LRU / LFU / FIFO / Random│  │
//! │  │  events)     │    │   lock)      │    └──────────────────────────┘  │
//! │  └──────┬───────┘    │              │───►┌──────────────────────────┐  │
//! │         │            └──────────────┘    │ Codec                    │  │
//! │         │                                │ deflate + sha256 / crc32 │  │
//! │         ▼                                └──────────────────────────┘  │
//! │  ┌──────────────┐    ┌───────────────────┐    ┌──────────────────┐     │
//! │  │ SnapshotSaver│───►│ PersistenceBridge │───►│ DurableStore     │     │
//! │  │ GcTask       │    └───────────────────┘    │ (host supplied)  │     │
//! │  └──────────────┘                             └──────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use fiscus_cache::{CacheHandle, EntryStore, SetOptions, StoreConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> fiscus_cache::CacheResult<()> {
//! let cache = CacheHandle::new(EntryStore::with_config(StoreConfig::default()));
//! cache.set("receipts:42", json!({"total": 1099}), SetOptions::new().ttl(60_000)).await?;
//! assert!(cache.get("receipts:42").await.is_some());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod durable;
pub mod error;
pub mod eviction;
pub mod gc;
pub mod handle;
pub mod metrics;
pub mod persistence;
pub mod store;

pub use codec::{Codec, DeflateCodec};
pub use durable::{DurableStore, MemoryDurableStore, SharedDurableStore};
pub use error::{CacheError, CacheResult};
pub use eviction::EvictionEngine;
pub use gc::{GcTask, GcTaskHandle};
pub use handle::{CacheEvent, CacheHandle};
pub use persistence::{
    DurableRecord, LoadReport, PersistenceBridge, Snapshot, SnapshotSaver, SnapshotSaverHandle,
    SNAPSHOT_SCHEMA_VERSION,
};
pub use store::{Admission, EntryStore, GcReport, Lookup, SetOptions, SetOutcome, StoreConfig};

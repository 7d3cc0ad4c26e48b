//! # Cache Handle
//!
//! The explicit, injectable handle every coordinator shares instead of a
//! process-wide cache singleton. Tests build a fresh handle per case.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ReadCoordinator ─┐                                                     │
//! │  WriteCoordinator ┼──► CacheHandle ──► Arc<Mutex<EntryStore>>           │
//! │  ReplayProcessor ─┘         │                                           │
//! │                             └──► broadcast<CacheEvent> ──► SnapshotSaver│
//! │                                                         └─► subscribers │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is only ever held for synchronous store work, never across an
//! `.await` on I/O, so every public operation is atomic with respect to the
//! others.

use std::sync::Arc;

use fiscus_core::{CacheEntry, CacheMetrics, SharedClock};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::CacheResult;
use crate::store::{Admission, EntryStore, GcReport, Lookup, SetOptions, SetOutcome};

/// Capacity of the event channel. Slow subscribers see `Lagged` and skip ahead.
const EVENT_CAPACITY: usize = 256;

/// Change notifications published after every mutating cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { key: String },
    Removed { key: String },
    Invalidated { keys: Vec<String> },
    Cleared { count: usize },
    Evicted { keys: Vec<String> },
    Expired { keys: Vec<String> },
    Corrupted { key: String },
    /// An entry was put back from a snapshot (optimistic rollback).
    Restored { key: String },
    /// A persisted snapshot was admitted at startup.
    Loaded { admitted: usize },
}

impl CacheEvent {
    /// Returns true if the persisted snapshot is now out of date.
    pub fn marks_dirty(&self) -> bool {
        !matches!(self, CacheEvent::Loaded { .. })
    }
}

#[derive(Clone)]
pub struct CacheHandle {
    store: Arc<Mutex<EntryStore>>,
    events: broadcast::Sender<CacheEvent>,
    clock: SharedClock,
}

impl CacheHandle {
    pub fn new(store: EntryStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let clock = store.clock().clone();
        CacheHandle {
            store: Arc::new(Mutex::new(store)),
            events,
            clock,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn emit_evicted(&self, keys: Vec<String>) {
        if !keys.is_empty() {
            self.emit(CacheEvent::Evicted { keys });
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn set(&self, key: &str, value: Value, opts: SetOptions) -> CacheResult<SetOutcome> {
        let outcome = self.store.lock().await.set(key, value, opts)?;
        self.emit_evicted(outcome.evicted.clone());
        self.emit(CacheEvent::Updated {
            key: key.to_string(),
        });
        Ok(outcome)
    }

    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.store.lock().await.remove(key);
        if removed {
            self.emit(CacheEvent::Removed {
                key: key.to_string(),
            });
        }
        removed
    }

    pub async fn clear(&self) -> usize {
        let count = self.store.lock().await.clear();
        self.emit(CacheEvent::Cleared { count });
        count
    }

    pub async fn invalidate(&self, prefix: Option<&str>) -> Vec<String> {
        let keys = self.store.lock().await.invalidate(prefix);
        if !keys.is_empty() {
            debug!(prefix = ?prefix, count = keys.len(), "Invalidated cache entries");
            self.emit(CacheEvent::Invalidated { keys: keys.clone() });
        }
        keys
    }

    pub async fn invalidate_tag(&self, tag: &str) -> Vec<String> {
        let keys = self.store.lock().await.invalidate_tag(tag);
        if !keys.is_empty() {
            self.emit(CacheEvent::Invalidated { keys: keys.clone() });
        }
        keys
    }

    pub async fn gc(&self) -> GcReport {
        let report = self.store.lock().await.gc();
        if !report.expired.is_empty() {
            self.emit(CacheEvent::Expired {
                keys: report.expired.clone(),
            });
        }
        self.emit_evicted(report.idle.clone());
        report
    }

    /// Captures the raw entry under `key` for a later [`restore_entry`](Self::restore_entry).
    pub async fn entry_snapshot(&self, key: &str) -> Option<CacheEntry> {
        self.store.lock().await.entry(key).cloned()
    }

    /// Puts `key` back to a captured state: the entry if there was one,
    /// absent otherwise.
    pub async fn restore_entry(&self, key: &str, snapshot: Option<CacheEntry>) {
        let evicted = {
            let mut store = self.store.lock().await;
            match snapshot {
                Some(entry) => store.restore(entry),
                None => {
                    store.remove(key);
                    Vec::new()
                }
            }
        };
        self.emit_evicted(evicted);
        self.emit(CacheEvent::Restored {
            key: key.to_string(),
        });
    }

    /// Admits a batch of persisted entries in order.
    pub async fn admit_all(&self, entries: Vec<CacheEntry>) -> Vec<(String, Admission)> {
        let results: Vec<(String, Admission)> = {
            let mut store = self.store.lock().await;
            entries
                .into_iter()
                .map(|entry| {
                    let key = entry.key.clone();
                    (key, store.admit(entry))
                })
                .collect()
        };

        let admitted = results
            .iter()
            .filter(|(_, a)| matches!(a, Admission::Admitted { .. }))
            .count();
        self.emit(CacheEvent::Loaded { admitted });
        results
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key).await.into_value()
    }

    pub async fn lookup(&self, key: &str) -> Lookup {
        let lookup = self.store.lock().await.lookup(key);
        match &lookup {
            Lookup::Expired { .. } => self.emit(CacheEvent::Expired {
                keys: vec![key.to_string()],
            }),
            Lookup::Corrupted => self.emit(CacheEvent::Corrupted {
                key: key.to_string(),
            }),
            Lookup::Hit(_) | Lookup::Miss => {}
        }
        lookup
    }

    pub async fn peek_stale(&self, key: &str) -> Option<Value> {
        self.store.lock().await.peek_stale(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.store.lock().await.contains(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.store.lock().await.keys()
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.store.lock().await.metrics()
    }

    pub async fn export(&self) -> Vec<CacheEntry> {
        self.store.lock().await.export()
    }
}

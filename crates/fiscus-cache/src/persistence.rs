//! # Persistence Bridge
//!
//! Snapshots the entry store into a [`DurableStore`] and reads it back on
//! startup.
//!
//! ## Snapshot Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Persistence Flow                                  │
//! │                                                                         │
//! │  CacheHandle ── CacheEvent ──► SnapshotSaver (debounce, default 1s)    │
//! │                                  capped at max_wait from first write   │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                           PersistenceBridge::save()                     │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │   <ns>:cache:snapshot = { schema_version: 1, saved_at, entries: {...} } │
//! │                                                                         │
//! │  Startup: PersistenceBridge::load()                                    │
//! │    1. reject any schema_version other than 1                           │
//! │    2. parse each entry on its own (bad JSON → dropped_corrupt)         │
//! │    3. EntryStore::admit: TTL (→ dropped_expired), checksum (→ corrupt) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Save failures are logged by the saver and never reach cache callers.

use std::collections::BTreeMap;
use std::time::Duration;

use fiscus_core::CacheEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::durable::SharedDurableStore;
use crate::error::{CacheError, CacheResult};
use crate::handle::{CacheEvent, CacheHandle};
use crate::store::Admission;

/// Snapshot format written by this version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Default cap on how long continuous writes can defer a snapshot.
pub const DEFAULT_SAVE_MAX_WAIT: Duration = Duration::from_secs(10);

// =============================================================================
// Snapshot Format
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at: u64,
    pub entries: BTreeMap<String, CacheEntry>,
}

/// Envelope with entries left unparsed, so one bad entry does not sink the rest.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    schema_version: u32,
    #[serde(default)]
    saved_at: u64,
    #[serde(default)]
    entries: BTreeMap<String, Value>,
}

/// Outcome of [`PersistenceBridge::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub admitted: usize,
    pub dropped_corrupt: usize,
    pub dropped_expired: usize,
}

/// A durable per-query record: the last payload the network returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub data: Value,
    pub stored_at: u64,
}

// =============================================================================
// Persistence Bridge
// =============================================================================

#[derive(Clone)]
pub struct PersistenceBridge {
    store: SharedDurableStore,
    namespace: String,
}

impl PersistenceBridge {
    pub fn new(store: SharedDurableStore, namespace: impl Into<String>) -> Self {
        PersistenceBridge {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn durable(&self) -> &SharedDurableStore {
        &self.store
    }

    pub fn snapshot_key(&self) -> String {
        format!("{}:cache:snapshot", self.namespace)
    }

    pub fn data_key(&self, key: &str) -> String {
        format!("{}:data:{}", self.namespace, key)
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Writes every entry to the snapshot key. Returns the number saved.
    pub async fn save(&self, cache: &CacheHandle) -> CacheResult<usize> {
        let entries: BTreeMap<String, CacheEntry> = cache
            .export()
            .await
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        let count = entries.len();

        let snapshot = Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: cache.now_ms(),
            entries,
        };
        let json = serde_json::to_string(&snapshot)?;
        self.store.set(&self.snapshot_key(), json).await?;

        debug!(entries = count, "Cache snapshot saved");
        Ok(count)
    }

    /// Reads the snapshot back into `cache`.
    ///
    /// A missing snapshot is an empty report. An unreadable envelope or an
    /// unknown schema version is an error and nothing is admitted.
    pub async fn load(&self, cache: &CacheHandle) -> CacheResult<LoadReport> {
        let key = self.snapshot_key();
        let Some(json) = self.store.get(&key).await? else {
            debug!("No cache snapshot to load");
            return Ok(LoadReport::default());
        };

        let raw: RawSnapshot = serde_json::from_str(&json)
            .map_err(|e| CacheError::corruption(&key, e.to_string()))?;

        if raw.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(CacheError::UnsupportedSnapshotVersion {
                found: raw.schema_version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        let mut report = LoadReport::default();
        let mut entries = Vec::with_capacity(raw.entries.len());
        for (entry_key, value) in raw.entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) if entry.key == entry_key => entries.push(entry),
                Ok(entry) => {
                    warn!(key = %entry_key, stored = %entry.key, "Snapshot entry key mismatch");
                    report.dropped_corrupt += 1;
                }
                Err(e) => {
                    warn!(key = %entry_key, error = %e, "Unreadable snapshot entry");
                    report.dropped_corrupt += 1;
                }
            }
        }

        // Preserve the saved insertion order for FIFO and tie-breaks
        entries.sort_by_key(|e| e.seq);

        for (entry_key, admission) in cache.admit_all(entries).await {
            match admission {
                Admission::Admitted { .. } => report.admitted += 1,
                Admission::Expired => report.dropped_expired += 1,
                Admission::Corrupt(reason) => {
                    warn!(key = %entry_key, %reason, "Dropping corrupt snapshot entry");
                    report.dropped_corrupt += 1;
                }
            }
        }

        info!(
            admitted = report.admitted,
            dropped_corrupt = report.dropped_corrupt,
            dropped_expired = report.dropped_expired,
            saved_at = raw.saved_at,
            "Cache snapshot loaded"
        );
        Ok(report)
    }

    // =========================================================================
    // Durable Query Records
    // =========================================================================

    pub async fn read_record(&self, key: &str) -> CacheResult<Option<DurableRecord>> {
        let storage_key = self.data_key(key);
        let Some(json) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping unreadable durable record");
                self.store.delete(&storage_key).await?;
                Ok(None)
            }
        }
    }

    pub async fn write_record(&self, key: &str, data: &Value, stored_at: u64) -> CacheResult<()> {
        let record = DurableRecord {
            data: data.clone(),
            stored_at,
        };
        let json = serde_json::to_string(&record)?;
        self.store.set(&self.data_key(key), json).await
    }

    pub async fn delete_record(&self, key: &str) -> CacheResult<()> {
        self.store.delete(&self.data_key(key)).await
    }

    /// Deletes every durable record under a query key prefix.
    pub async fn delete_records(&self, prefix: &str) -> CacheResult<usize> {
        let rows = self.store.query(&self.data_key(prefix)).await?;
        for (storage_key, _) in &rows {
            self.store.delete(storage_key).await?;
        }
        Ok(rows.len())
    }
}

// =============================================================================
// Snapshot Saver
// =============================================================================

enum SaverCommand {
    Flush(oneshot::Sender<CacheResult<usize>>),
}

/// Background task that saves a snapshot once the cache has been quiet for
/// the debounce window, or once `max_wait` has passed since the first
/// unsaved change, whichever comes first.
pub struct SnapshotSaver {
    bridge: PersistenceBridge,
    cache: CacheHandle,
    debounce: Duration,
    max_wait: Duration,
    events: broadcast::Receiver<CacheEvent>,
    command_rx: mpsc::Receiver<SaverCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the snapshot saver.
#[derive(Clone)]
pub struct SnapshotSaverHandle {
    command_tx: mpsc::Sender<SaverCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SnapshotSaverHandle {
    /// Saves immediately and waits for the result.
    pub async fn flush(&self) -> CacheResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SaverCommand::Flush(tx))
            .await
            .map_err(|_| CacheError::ChannelError("Saver command channel closed".into()))?;
        rx.await
            .map_err(|_| CacheError::ChannelError("Saver dropped flush reply".into()))?
    }

    /// Triggers graceful shutdown. A pending debounced save is written first.
    pub async fn shutdown(&self) -> CacheResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| CacheError::ChannelError("Shutdown channel closed".into()))
    }
}

impl SnapshotSaver {
    pub fn new(
        bridge: PersistenceBridge,
        cache: CacheHandle,
        debounce: Duration,
    ) -> (Self, SnapshotSaverHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let events = cache.subscribe();

        let saver = SnapshotSaver {
            bridge,
            cache,
            debounce,
            max_wait: DEFAULT_SAVE_MAX_WAIT.max(debounce),
            events,
            command_rx,
            shutdown_rx,
        };
        (saver, SnapshotSaverHandle { command_tx, shutdown_tx })
    }

    /// Overrides the save cap. Never shorter than the debounce window.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.debounce);
        self
    }

    /// Runs the saver loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(
            debounce_ms = self.debounce.as_millis() as u64,
            max_wait_ms = self.max_wait.as_millis() as u64,
            "Snapshot saver starting"
        );

        let mut deadline: Option<Instant> = None;
        let mut first_dirty: Option<Instant> = None;

        loop {
            let sleep_until = deadline;
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) if event.marks_dirty() => {
                        deadline = Some(self.next_deadline(&mut first_dirty));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Saver lagged behind cache events");
                        deadline = Some(self.next_deadline(&mut first_dirty));
                    }
                    Err(RecvError::Closed) => {
                        debug!("Cache event channel closed");
                        break;
                    }
                },

                _ = async {
                    if let Some(at) = sleep_until {
                        tokio::time::sleep_until(at).await;
                    }
                }, if sleep_until.is_some() => {
                    deadline = None;
                    first_dirty = None;
                    self.save_logged().await;
                }

                Some(command) = self.command_rx.recv() => match command {
                    SaverCommand::Flush(reply) => {
                        deadline = None;
                        first_dirty = None;
                        let _ = reply.send(self.bridge.save(&self.cache).await);
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Snapshot saver shutting down");
                    let mut dirty = deadline.is_some();
                    while let Ok(event) = self.events.try_recv() {
                        dirty |= event.marks_dirty();
                    }
                    if dirty {
                        self.save_logged().await;
                    }
                    break;
                }
            }
        }

        info!("Snapshot saver stopped");
    }

    /// Debounced deadline, never later than `max_wait` after the first
    /// change since the last save.
    fn next_deadline(&self, first_dirty: &mut Option<Instant>) -> Instant {
        let now = Instant::now();
        let started = *first_dirty.get_or_insert(now);
        (now + self.debounce).min(started + self.max_wait)
    }

    async fn save_logged(&self) {
        if let Err(e) = self.bridge.save(&self.cache).await {
            error!(?e, "Failed to save cache snapshot");
        }
    }
}

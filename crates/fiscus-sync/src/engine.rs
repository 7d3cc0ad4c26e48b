//! # Sync Engine
//!
//! Wires the cache, the durable store, the coordinators and the background
//! tasks into one object the host application owns.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          SyncEngine                              │  │
//! │  │                                                                  │  │
//! │  │  • Restores the cache snapshot on start                          │  │
//! │  │  • Requeues mutations interrupted by the last shutdown           │  │
//! │  │  • Spawns and stops the background tasks                         │  │
//! │  │  • Reports status for the POS frontend                           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │    GcTask      │  │ SnapshotSaver  │  │   ReplayProcessor      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ expired + idle │  │ debounced      │  │ drains the offline     │    │
//! │  │ entries        │  │ cache snapshot │  │ queue                  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  Reads go through `reads()`, writes through `writes()`.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use fiscus_cache::{
    CacheHandle, Codec, DeflateCodec, EntryStore, GcTask, GcTaskHandle, LoadReport,
    PersistenceBridge, SharedDurableStore, SnapshotSaver, SnapshotSaverHandle,
};
use fiscus_core::{CacheMetrics, MutationStatus, SharedClock, SystemClock};
use serde::Serialize;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::mutation::WriteCoordinator;
use crate::query::ReadCoordinator;
use crate::queue::{DurableQueue, MemoryQueue, SharedQueue};
use crate::replay::{MergeFn, ReplayProcessor, ReplayProcessorHandle, ReplaySummary, Replayer};
use crate::retry::RetryDelay;
use crate::transport::{SharedTransport, UnreachableTransport};

// =============================================================================
// Engine Status
// =============================================================================

/// Current engine status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct EngineStatus {
    pub is_online: bool,

    /// Queued mutations that have not failed yet.
    pub pending_mutations: usize,

    /// Queued mutations whose last delivery failed.
    pub failed_mutations: usize,

    /// Last acknowledged replay (RFC3339).
    pub last_sync: Option<String>,

    pub metrics: CacheMetrics,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`SyncEngine`]. Every collaborator is optional.
///
/// Without a durable store nothing survives a restart: the queue is kept in
/// memory and no snapshot is written.
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    durable: Option<SharedDurableStore>,
    transport: Option<SharedTransport>,
    queue: Option<SharedQueue>,
    connectivity: Option<ConnectivityMonitor>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    clock: Option<SharedClock>,
    codec: Option<Arc<dyn Codec>>,
    merge: Option<MergeFn>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_durable_store(mut self, store: SharedDurableStore) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the queue picked from the durable store.
    pub fn with_queue(mut self, queue: SharedQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Merge function used by the `Merge` conflict policy.
    pub fn with_merge<F>(mut self, merge: F) -> Self
    where
        F: Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.merge = Some(Arc::new(merge));
        self
    }

    /// Validates the configuration and wires the engine. Nothing is spawned
    /// until [`SyncEngine::start`].
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(DeflateCodec::default()));
        let cache = CacheHandle::new(EntryStore::new(config.cache.store_config(), codec, clock));

        let persistence = match (&self.durable, config.persistence.enabled) {
            (Some(store), true) => Some(PersistenceBridge::new(
                store.clone(),
                config.persistence.namespace.clone(),
            )),
            _ => None,
        };

        let queue: SharedQueue = match (self.queue, &persistence) {
            (Some(queue), _) => queue,
            (None, Some(bridge)) => Arc::new(DurableQueue::new(
                bridge.durable().clone(),
                &config.persistence.namespace,
            )),
            (None, None) => Arc::new(MemoryQueue::new()),
        };

        let connectivity = self.connectivity.unwrap_or_default();
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UnreachableTransport));

        let reads = ReadCoordinator::new(
            cache.clone(),
            persistence.clone(),
            connectivity.clone(),
            config.query.clone(),
        );
        let replayer = Replayer::new(queue, transport, reads.clone(), emitter.clone(), self.merge);
        let writes = WriteCoordinator::new(
            reads.clone(),
            replayer.clone(),
            config.mutation.clone(),
            config.queue.max_retries,
            RetryDelay::from_millis(config.query.retry_base_delay_ms, config.query.retry_max_delay_ms),
        );

        debug!(
            durable = persistence.is_some(),
            namespace = %config.persistence.namespace,
            "Sync engine built"
        );

        Ok(SyncEngine {
            config,
            cache,
            persistence,
            connectivity,
            emitter,
            reads,
            writes,
            replayer,
            gc_handle: None,
            saver_handle: None,
            replay_handle: None,
        })
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

pub struct SyncEngine {
    config: Arc<EngineConfig>,
    cache: CacheHandle,
    persistence: Option<PersistenceBridge>,
    connectivity: ConnectivityMonitor,
    emitter: Arc<dyn SyncEventEmitter>,
    reads: ReadCoordinator,
    writes: WriteCoordinator,
    replayer: Replayer,

    /// GC task handle (set after start).
    gc_handle: Option<GcTaskHandle>,

    /// Snapshot saver handle, only with persistence.
    saver_handle: Option<SnapshotSaverHandle>,

    /// Replay processor handle.
    replay_handle: Option<ReplayProcessorHandle>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reads(&self) -> &ReadCoordinator {
        &self.reads
    }

    pub fn writes(&self) -> &WriteCoordinator {
        &self.writes
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn replayer(&self) -> &Replayer {
        &self.replayer
    }

    pub fn is_started(&self) -> bool {
        self.replay_handle.is_some()
    }

    /// Starts the engine.
    ///
    /// Restores the persisted snapshot, requeues mutations left mid-delivery,
    /// then spawns the GC, snapshot and replay tasks. Storage failures are
    /// logged; the engine still starts with an empty cache.
    pub async fn start(&mut self) -> SyncResult<Option<LoadReport>> {
        if self.is_started() {
            warn!("Sync engine already started");
            return Ok(None);
        }

        let report = match &self.persistence {
            Some(bridge) => match bridge.load(&self.cache).await {
                Ok(report) => {
                    info!(
                        admitted = report.admitted,
                        dropped_corrupt = report.dropped_corrupt,
                        dropped_expired = report.dropped_expired,
                        "Cache snapshot restored"
                    );
                    Some(report)
                }
                Err(e) => {
                    warn!(error = %e, "Cache snapshot not restored");
                    None
                }
            },
            None => None,
        };

        self.replayer.recover_interrupted().await?;

        let (gc_task, gc_handle) = GcTask::new(self.cache.clone(), self.config.cache.gc_interval());
        tokio::spawn(gc_task.run());
        self.gc_handle = Some(gc_handle);

        if let Some(bridge) = &self.persistence {
            let (saver, saver_handle) = SnapshotSaver::new(
                bridge.clone(),
                self.cache.clone(),
                self.config.persistence.debounce(),
            );
            let saver = saver.with_max_wait(self.config.persistence.max_wait());
            tokio::spawn(saver.run());
            self.saver_handle = Some(saver_handle);
        }

        let (processor, replay_handle) = ReplayProcessor::new(
            self.replayer.clone(),
            self.connectivity.clone(),
            self.emitter.clone(),
            self.config.queue.replay_interval(),
        );
        tokio::spawn(processor.run());
        self.replay_handle = Some(replay_handle);

        info!(online = self.connectivity.is_online(), "Sync engine started");
        Ok(report)
    }

    /// Stops the background tasks after writing a final snapshot.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync engine");

        if let Some(handle) = self.replay_handle.take() {
            let _ = handle.shutdown().await;
        }

        if let Some(handle) = self.saver_handle.take() {
            match handle.flush().await {
                Ok(saved) => debug!(saved, "Final snapshot written"),
                Err(e) => warn!(error = %e, "Final snapshot failed"),
            }
            let _ = handle.shutdown().await;
        }

        if let Some(handle) = self.gc_handle.take() {
            let _ = handle.shutdown().await;
        }

        info!("Sync engine stopped");
        Ok(())
    }

    /// Replays the queue now. Works before `start` too.
    pub async fn sync_now(&self) -> SyncResult<ReplaySummary> {
        match &self.replay_handle {
            Some(handle) => handle.sync_now().await,
            None => self.replayer.process_all().await,
        }
    }

    pub async fn status(&self) -> SyncResult<EngineStatus> {
        let items = self.replayer.queue().get_items().await?;
        let failed_mutations = items
            .iter()
            .filter(|item| item.status == MutationStatus::Failed)
            .count();

        Ok(EngineStatus {
            is_online: self.connectivity.is_online(),
            pending_mutations: items.len() - failed_mutations,
            failed_mutations,
            last_sync: self.replayer.last_sync().await.map(|t| t.to_rfc3339()),
            metrics: self.cache.metrics().await,
        })
    }
}

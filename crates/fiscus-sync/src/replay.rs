//! # Queue Replay
//!
//! Delivers queued mutations once the device is back online and reconciles
//! what the server returned with the optimistic projection in the cache.
//!
//! ## Replay Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ReplayProcessor                                 │
//! │                                                                         │
//! │  triggers: interval tick │ offline → online │ sync_now()                │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  queue.get_items()  (Critical first, then oldest)                       │
//! │                              │                                          │
//! │              for each item: transport.deliver(item)                     │
//! │                 ┌────────────┴─────────────┐                            │
//! │                 ▼ ack                      ▼ failure                    │
//! │        remove from queue            retry_count += 1                    │
//! │        invalidate declared keys     ├─ budget left + transient:         │
//! │        reconcile cache_key:         │    keep item, stop this pass      │
//! │          same as projection ─► write│                                   │
//! │          differs ─► conflict policy └─ exhausted or rejected:           │
//! │                                          remove, restore the value the  │
//! │                                          projection replaced,           │
//! │                                          emit_exhausted                 │
//! │                                                                         │
//! │  every outcome is broadcast by mutation id (Replayer::subscribe)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Policies
//! ```text
//!  ServerWins   cache_key ← server
//!  ClientWins   cache_key ← local projection, local payload re-queued
//!  Merge        cache_key ← merge(local, server), merged value re-queued
//!  Manual       cache untouched, ConflictReport emitted
//! ```
//!
//! Re-queued follow-ups carry the Manual policy so a second disagreement is
//! reported instead of looping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fiscus_core::{ConflictPolicy, MutationKind, MutationStatus, QueuedMutation};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::events::{ConflictReport, SyncEventEmitter};
use crate::query::ReadCoordinator;
use crate::queue::SharedQueue;
use crate::transport::SharedTransport;

/// Combines the local projection with the server state.
pub type MergeFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

const OUTCOME_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// The server acknowledged the item and it left the queue.
    Synced {
        id: String,
        conflict: Option<ConflictReport>,
    },
    /// Delivery failed; the item stays queued for another attempt.
    Failed { id: String, error: SyncError },
    /// The item was dropped for good. `error` is a `QueueExhausted`.
    Exhausted { id: String, error: SyncError },
}

impl ReplayOutcome {
    pub fn id(&self) -> &str {
        match self {
            ReplayOutcome::Synced { id, .. }
            | ReplayOutcome::Failed { id, .. }
            | ReplayOutcome::Exhausted { id, .. } => id,
        }
    }

    /// True once the item has left the queue.
    pub fn is_final(&self) -> bool {
        !matches!(self, ReplayOutcome::Failed { .. })
    }
}

/// Totals of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct ReplaySummary {
    pub synced: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub conflicts: usize,
    /// Items still in the queue when the pass ended.
    pub remaining: usize,
}

// =============================================================================
// Replayer
// =============================================================================

/// Delivery and reconciliation of queued mutations.
///
/// Passes are serialized: an out-of-band `force_sync` never races the
/// background loop on the same item.
#[derive(Clone)]
pub struct Replayer {
    queue: SharedQueue,
    transport: SharedTransport,
    reads: ReadCoordinator,
    emitter: Arc<dyn SyncEventEmitter>,
    merge: Option<MergeFn>,
    pass_lock: Arc<Mutex<()>>,
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
    outcomes: broadcast::Sender<ReplayOutcome>,
}

impl Replayer {
    pub fn new(
        queue: SharedQueue,
        transport: SharedTransport,
        reads: ReadCoordinator,
        emitter: Arc<dyn SyncEventEmitter>,
        merge: Option<MergeFn>,
    ) -> Self {
        Replayer {
            queue,
            transport,
            reads,
            emitter,
            merge,
            pass_lock: Arc::new(Mutex::new(())),
            last_sync: Arc::new(Mutex::new(None)),
            outcomes: broadcast::channel(OUTCOME_CHANNEL_CAPACITY).0,
        }
    }

    /// Receives the outcome of every delivery attempt, keyed by mutation id.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplayOutcome> {
        self.outcomes.subscribe()
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Time of the last acknowledged delivery.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().await
    }

    /// Replays one queued item now, whatever its status.
    pub async fn process_item(&self, id: &str) -> SyncResult<ReplayOutcome> {
        let _pass = self.pass_lock.lock().await;
        match self.queue.get(id).await? {
            Some(item) => self.deliver(item).await,
            None => Err(SyncError::Queue(format!("Unknown queue item {}", id))),
        }
    }

    /// Replays every replayable item in order until the queue is drained, the
    /// device goes offline, or a transient failure ends the pass.
    pub async fn process_all(&self) -> SyncResult<ReplaySummary> {
        let _pass = self.pass_lock.lock().await;
        let items = self.queue.get_items().await?;
        let mut summary = ReplaySummary::default();

        if !items.is_empty() {
            info!(count = items.len(), "Replaying offline queue");
        }

        for item in items {
            if !item.status.is_replayable() {
                continue;
            }
            if !self.reads.connectivity().is_online() {
                debug!("Went offline, ending replay pass");
                break;
            }

            match self.deliver(item).await? {
                ReplayOutcome::Synced { conflict, .. } => {
                    summary.synced += 1;
                    if conflict.is_some() {
                        summary.conflicts += 1;
                    }
                }
                ReplayOutcome::Exhausted { .. } => summary.exhausted += 1,
                ReplayOutcome::Failed { .. } => {
                    summary.failed += 1;
                    break;
                }
            }

            let pending = self.queue.len().await?;
            self.emitter.emit_progress(pending, summary.synced);
        }

        summary.remaining = self.queue.len().await?;
        if summary.synced + summary.failed + summary.exhausted > 0 {
            info!(
                synced = summary.synced,
                failed = summary.failed,
                exhausted = summary.exhausted,
                conflicts = summary.conflicts,
                remaining = summary.remaining,
                "Replay pass finished"
            );
        }
        Ok(summary)
    }

    /// Puts every failed item back in line with a fresh retry budget.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let _pass = self.pass_lock.lock().await;
        let mut count = 0;
        for mut item in self.queue.get_items().await? {
            if item.status == MutationStatus::Failed {
                item.reset_for_retry();
                self.queue.update(&item).await?;
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "Failed mutations reset for retry");
        }
        Ok(count)
    }

    /// Requeues items left in `Syncing` by an interrupted process.
    pub async fn recover_interrupted(&self) -> SyncResult<usize> {
        let _pass = self.pass_lock.lock().await;
        let mut count = 0;
        for mut item in self.queue.get_items().await? {
            if item.status == MutationStatus::Syncing || item.status == MutationStatus::Pending {
                item.mark_queued();
                self.queue.update(&item).await?;
                count += 1;
            }
        }
        if count > 0 {
            warn!(count, "Requeued mutations interrupted mid-delivery");
        }
        Ok(count)
    }

    /// Drops every queued mutation. Returns how many were removed.
    pub async fn clear_queue(&self) -> SyncResult<usize> {
        let _pass = self.pass_lock.lock().await;
        let count = self.queue.clear().await?;
        warn!(count, "Offline queue cleared");
        self.emitter.emit_progress(0, 0);
        Ok(count)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    async fn deliver(&self, mut item: QueuedMutation) -> SyncResult<ReplayOutcome> {
        item.mark_syncing();
        self.queue.update(&item).await?;
        debug!(
            id = %item.id,
            resource_type = %item.resource_type,
            attempt = item.retry_count + 1,
            "Delivering queued mutation"
        );

        let outcome = match self.transport.deliver(&item).await {
            Ok(server) => self.acknowledge(item, server).await?,
            Err(error) => self.fail(item, error).await?,
        };
        // No subscribers is fine
        let _ = self.outcomes.send(outcome.clone());
        Ok(outcome)
    }

    async fn acknowledge(&self, mut item: QueuedMutation, server: Value) -> SyncResult<ReplayOutcome> {
        item.mark_synced();
        // Removed before reconciling: an acknowledged write is never re-sent
        self.queue.remove(&item.id).await?;
        *self.last_sync.lock().await = Some(Utc::now());
        info!(id = %item.id, resource_type = %item.resource_type, "Queued mutation synced");

        for prefix in &item.invalidates {
            self.reads.invalidate_queries(prefix).await;
        }

        let conflict = self.reconcile(&item, server).await?;
        Ok(ReplayOutcome::Synced {
            id: item.id,
            conflict,
        })
    }

    async fn reconcile(
        &self,
        item: &QueuedMutation,
        server: Value,
    ) -> SyncResult<Option<ConflictReport>> {
        let Some(key) = item.cache_key.as_deref() else {
            return Ok(None);
        };

        let local = match &item.optimistic {
            Some(local) if *local != server => local.clone(),
            _ => {
                self.write_through(key, server).await;
                return Ok(None);
            }
        };

        let report = ConflictReport {
            mutation_id: item.id.clone(),
            resource_type: item.resource_type.clone(),
            cache_key: Some(key.to_string()),
            policy: item.conflict_policy,
            local: local.clone(),
            server: server.clone(),
        };
        warn!(
            id = %item.id,
            key = %key,
            policy = %item.conflict_policy,
            "Server state differs from optimistic projection"
        );

        match item.conflict_policy {
            ConflictPolicy::ServerWins => self.write_through(key, server).await,
            ConflictPolicy::ClientWins => {
                self.write_through(key, local.clone()).await;
                self.redeliver(item, item.payload.clone(), local).await?;
            }
            ConflictPolicy::Merge => match &self.merge {
                Some(merge) => {
                    let merged = merge(&local, &server);
                    self.write_through(key, merged.clone()).await;
                    self.redeliver(item, merged.clone(), merged).await?;
                }
                None => {
                    warn!(id = %item.id, "No merge function configured, reporting conflict");
                    self.emitter.emit_conflict(&report);
                }
            },
            ConflictPolicy::Manual => self.emitter.emit_conflict(&report),
        }

        Ok(Some(report))
    }

    async fn fail(&self, mut item: QueuedMutation, error: SyncError) -> SyncResult<ReplayOutcome> {
        let rejected = !error.is_retryable();
        let exhausted = item.record_failure(error.to_string()) || rejected;

        if !exhausted {
            self.queue.update(&item).await?;
            warn!(
                id = %item.id,
                attempt = item.retry_count,
                max_retries = item.max_retries,
                error = %error,
                "Queued mutation delivery failed"
            );
            return Ok(ReplayOutcome::Failed { id: item.id, error });
        }

        self.queue.remove(&item.id).await?;
        if let Some(key) = &item.cache_key {
            // The projection stood for a write that never landed
            match item.previous.clone() {
                Some(previous) => self.write_through(key, previous).await,
                None => {
                    self.reads.cache().remove(key).await;
                }
            }
        }
        error!(
            id = %item.id,
            resource_type = %item.resource_type,
            attempts = item.retry_count,
            rejected,
            error = %error,
            "Queued mutation exhausted"
        );
        self.emitter.emit_exhausted(&item);

        Ok(ReplayOutcome::Exhausted {
            error: SyncError::QueueExhausted {
                id: item.id.clone(),
                attempts: item.retry_count,
                last_error: error.to_string(),
            },
            id: item.id,
        })
    }

    async fn write_through(&self, key: &str, data: Value) {
        if let Err(e) = self.reads.set_query_data(key, data).await {
            warn!(key = %key, error = %e, "Failed to write reconciled data");
        }
    }

    async fn redeliver(
        &self,
        item: &QueuedMutation,
        payload: Value,
        projection: Value,
    ) -> SyncResult<()> {
        let mut follow_up = QueuedMutation::new(MutationKind::Update, item.resource_type.clone(), payload)
            .with_priority(item.priority)
            .with_conflict_policy(ConflictPolicy::Manual)
            .with_max_retries(item.max_retries)
            .with_cache_key(item.cache_key.clone())
            .with_optimistic(Some(projection))
            .with_previous(item.previous.clone())
            .with_invalidates(item.invalidates.clone());
        follow_up.mark_queued();

        info!(id = %follow_up.id, origin = %item.id, "Re-queued local data after conflict");
        self.queue.add(follow_up).await
    }
}

// =============================================================================
// Replay Processor
// =============================================================================

enum ReplayCommand {
    SyncNow(oneshot::Sender<SyncResult<ReplaySummary>>),
}

/// Background loop that replays the queue on an interval and whenever
/// connectivity returns.
pub struct ReplayProcessor {
    replayer: Replayer,
    connectivity: ConnectivityMonitor,
    emitter: Arc<dyn SyncEventEmitter>,
    period: Duration,
    command_rx: mpsc::Receiver<ReplayCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the replay processor.
#[derive(Clone)]
pub struct ReplayProcessorHandle {
    command_tx: mpsc::Sender<ReplayCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReplayProcessorHandle {
    /// Runs a replay pass now and waits for its summary.
    pub async fn sync_now(&self) -> SyncResult<ReplaySummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ReplayCommand::SyncNow(reply_tx))
            .await
            .map_err(|_| SyncError::ChannelError("Replay channel closed".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Replay reply dropped".into()))?
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl ReplayProcessor {
    pub fn new(
        replayer: Replayer,
        connectivity: ConnectivityMonitor,
        emitter: Arc<dyn SyncEventEmitter>,
        period: Duration,
    ) -> (Self, ReplayProcessorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = ReplayProcessor {
            replayer,
            connectivity,
            emitter,
            period,
            command_rx,
            shutdown_rx,
        };
        let handle = ReplayProcessorHandle {
            command_tx,
            shutdown_tx,
        };
        (processor, handle)
    }

    /// Runs the replay loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(period = ?self.period, "Replay processor starting");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut online_rx = self.connectivity.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.replay_pass().await;
                }

                Ok(()) = online_rx.changed() => {
                    let online = *online_rx.borrow_and_update();
                    self.emitter.emit_connectivity(online);
                    if online {
                        info!("Connectivity restored, replaying queue");
                        self.replay_pass().await;
                    }
                }

                Some(command) = self.command_rx.recv() => match command {
                    ReplayCommand::SyncNow(reply) => {
                        let result = self.replayer.process_all().await;
                        if reply.send(result).is_err() {
                            debug!("sync_now caller went away");
                        }
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Replay processor shutting down");
                    break;
                }
            }
        }

        info!("Replay processor stopped");
    }

    async fn replay_pass(&self) {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping replay");
            return;
        }
        if let Err(e) = self.replayer.process_all().await {
            error!(?e, "Replay pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuerySettings;
    use crate::queue::{MemoryQueue, MutationQueue};
    use crate::test_support::{test_cache, RecordingEmitter, ScriptedTransport};
    use fiscus_core::MutationPriority;
    use serde_json::json;

    struct Fixture {
        replayer: Replayer,
        queue: Arc<MemoryQueue>,
        transport: Arc<ScriptedTransport>,
        emitter: Arc<RecordingEmitter>,
        reads: ReadCoordinator,
        connectivity: ConnectivityMonitor,
    }

    fn fixture_with(merge: Option<MergeFn>) -> Fixture {
        let (cache, _clock) = test_cache();
        let connectivity = ConnectivityMonitor::online();
        let reads = ReadCoordinator::new(cache, None, connectivity.clone(), QuerySettings::default());
        let queue = Arc::new(MemoryQueue::new());
        let transport = Arc::new(ScriptedTransport::new());
        let emitter = Arc::new(RecordingEmitter::default());
        let replayer = Replayer::new(
            queue.clone(),
            transport.clone(),
            reads.clone(),
            emitter.clone(),
            merge,
        );
        Fixture {
            replayer,
            queue,
            transport,
            emitter,
            reads,
            connectivity,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn queued(key: &str, projection: Value, policy: ConflictPolicy) -> QueuedMutation {
        let mut m = QueuedMutation::new(MutationKind::Update, "receipt", json!({"total": 10}))
            .with_cache_key(Some(key.to_string()))
            .with_optimistic(Some(projection))
            .with_conflict_policy(policy)
            .with_max_retries(2);
        m.mark_queued();
        m
    }

    #[tokio::test]
    async fn test_ack_removes_item_and_writes_server_data() {
        let f = fixture();
        f.queue
            .add(queued("receipt:1", json!({"total": 10}), ConflictPolicy::ServerWins))
            .await
            .unwrap();
        f.transport.push_ok(json!({"total": 10}));

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.conflicts, 0);
        assert_eq!(summary.remaining, 0);
        assert_eq!(f.reads.get_query_data("receipt:1").await, Some(json!({"total": 10})));
        assert!(f.replayer.last_sync().await.is_some());
        assert_eq!(f.emitter.progress(), vec![(0, 1)]);
    }

    #[tokio::test]
    async fn test_ack_invalidates_declared_prefixes() {
        let f = fixture();
        f.reads.set_query_data("receipts:list", json!([])).await.unwrap();
        let mut item = queued("receipt:1", json!({}), ConflictPolicy::ServerWins);
        item.invalidates = vec!["receipts:".to_string()];
        f.queue.add(item).await.unwrap();

        f.replayer.process_all().await.unwrap();
        assert_eq!(f.reads.get_query_data("receipts:list").await, None);
    }

    #[tokio::test]
    async fn test_replay_follows_priority_order() {
        let f = fixture();
        let low = queued("a", json!(1), ConflictPolicy::ServerWins).with_priority(MutationPriority::Low);
        let critical =
            queued("b", json!(1), ConflictPolicy::ServerWins).with_priority(MutationPriority::Critical);
        f.queue.add(low.clone()).await.unwrap();
        f.queue.add(critical.clone()).await.unwrap();

        f.replayer.process_all().await.unwrap();
        let order: Vec<String> = f.transport.deliveries().into_iter().map(|m| m.id).collect();
        assert_eq!(order, vec![critical.id, low.id]);
    }

    #[tokio::test]
    async fn test_server_wins_conflict() {
        let f = fixture();
        f.queue
            .add(queued("k", json!({"v": "local"}), ConflictPolicy::ServerWins))
            .await
            .unwrap();
        f.transport.push_ok(json!({"v": "server"}));

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.conflicts, 1);
        assert_eq!(f.reads.get_query_data("k").await, Some(json!({"v": "server"})));
        assert!(f.emitter.conflicts().is_empty());
    }

    #[tokio::test]
    async fn test_client_wins_requeues_local_payload() {
        let f = fixture();
        let item = queued("k", json!({"v": "local"}), ConflictPolicy::ClientWins);
        f.queue.add(item.clone()).await.unwrap();
        f.transport.push_ok(json!({"v": "server"}));

        f.replayer.process_all().await.unwrap();
        assert_eq!(f.reads.get_query_data("k").await, Some(json!({"v": "local"})));

        let items = f.queue.get_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload, item.payload);
        assert_eq!(items[0].conflict_policy, ConflictPolicy::Manual);
        assert_ne!(items[0].id, item.id);
    }

    #[tokio::test]
    async fn test_merge_uses_merge_function() {
        let merge: MergeFn = Arc::new(|local: &Value, server: &Value| {
            json!({"local": local.clone(), "server": server.clone()})
        });
        let f = fixture_with(Some(merge));
        f.queue
            .add(queued("k", json!(1), ConflictPolicy::Merge))
            .await
            .unwrap();
        f.transport.push_ok(json!(2));

        f.replayer.process_all().await.unwrap();
        let merged = json!({"local": 1, "server": 2});
        assert_eq!(f.reads.get_query_data("k").await, Some(merged.clone()));
        assert_eq!(f.queue.get_items().await.unwrap()[0].payload, merged);
    }

    #[tokio::test]
    async fn test_manual_conflict_is_reported_untouched() {
        let f = fixture();
        f.reads.set_query_data("k", json!("local")).await.unwrap();
        f.queue
            .add(queued("k", json!("local"), ConflictPolicy::Manual))
            .await
            .unwrap();
        f.transport.push_ok(json!("server"));

        f.replayer.process_all().await.unwrap();
        assert_eq!(f.reads.get_query_data("k").await, Some(json!("local")));

        let conflicts = f.emitter.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].server, json!("server"));
        assert_eq!(conflicts[0].policy, ConflictPolicy::Manual);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_item_and_ends_pass() {
        let f = fixture();
        f.queue.add(queued("a", json!(1), ConflictPolicy::ServerWins)).await.unwrap();
        f.queue.add(queued("b", json!(1), ConflictPolicy::ServerWins)).await.unwrap();
        f.transport.push_err(SyncError::network("timeout"));

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 2);
        assert_eq!(f.transport.deliveries().len(), 1);

        let failed = f
            .queue
            .get_items()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.status == MutationStatus::Failed)
            .unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("Network error: timeout"));
    }

    #[tokio::test]
    async fn test_exhaustion_drops_item_and_projection() {
        let f = fixture();
        f.reads.set_query_data("k", json!("projection")).await.unwrap();
        let item = queued("k", json!("projection"), ConflictPolicy::ServerWins);
        f.queue.add(item.clone()).await.unwrap();
        for _ in 0..3 {
            f.transport.push_err(SyncError::network("down"));
        }

        // First attempt plus two retries
        for _ in 0..2 {
            let summary = f.replayer.process_all().await.unwrap();
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.remaining, 1);
        }
        let summary = f.replayer.process_all().await.unwrap();

        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(f.transport.deliveries().len(), 3);
        assert_eq!(f.reads.get_query_data("k").await, None);
        assert_eq!(f.emitter.exhausted(), vec![item.id]);
    }

    #[tokio::test]
    async fn test_single_retry_budget_survives_one_failure() {
        let f = fixture();
        let item = queued("k", json!(1), ConflictPolicy::ServerWins).with_max_retries(1);
        f.queue.add(item.clone()).await.unwrap();
        f.transport.push_err(SyncError::network("timeout"));

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exhausted, 0);
        assert_eq!(summary.remaining, 1);

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.synced, 1);
        assert_eq!(f.transport.deliveries().len(), 2);
        assert!(f.emitter.exhausted().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_restores_previous_value() {
        let f = fixture();
        f.reads.set_query_data("k", json!({"v": "projection"})).await.unwrap();
        let item = queued("k", json!({"v": "projection"}), ConflictPolicy::ServerWins)
            .with_max_retries(0)
            .with_previous(Some(json!({"v": "before"})));
        f.queue.add(item).await.unwrap();
        f.transport.push_err(SyncError::network("down"));

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.exhausted, 1);
        assert_eq!(f.reads.get_query_data("k").await, Some(json!({"v": "before"})));
    }

    #[tokio::test]
    async fn test_outcomes_are_broadcast_by_id() {
        let f = fixture();
        let mut outcomes = f.replayer.subscribe();
        let item = queued("k", json!(1), ConflictPolicy::ServerWins);
        f.queue.add(item.clone()).await.unwrap();
        f.transport.push_err(SyncError::network("timeout"));

        f.replayer.process_all().await.unwrap();
        f.replayer.process_all().await.unwrap();

        let first = outcomes.recv().await.unwrap();
        assert_eq!(first.id(), item.id);
        assert!(!first.is_final());

        let second = outcomes.recv().await.unwrap();
        assert!(matches!(second, ReplayOutcome::Synced { ref id, .. } if *id == item.id));
        assert!(second.is_final());
    }

    #[tokio::test]
    async fn test_rejection_exhausts_immediately() {
        let f = fixture();
        let item = queued("k", json!(1), ConflictPolicy::ServerWins);
        f.queue.add(item.clone()).await.unwrap();
        f.transport.push_err(SyncError::http(422, "invalid VAT"));

        let outcome = f.replayer.process_item(&item.id).await.unwrap();
        match outcome {
            ReplayOutcome::Exhausted { error, .. } => {
                assert!(matches!(error, SyncError::QueueExhausted { attempts: 1, .. }))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_pass_delivers_nothing() {
        let f = fixture();
        f.queue.add(queued("k", json!(1), ConflictPolicy::ServerWins)).await.unwrap();
        f.connectivity.set_online(false);

        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.remaining, 1);
        assert!(f.transport.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_and_recover() {
        let f = fixture();
        let mut failed = queued("a", json!(1), ConflictPolicy::ServerWins);
        failed.record_failure("timeout");
        let mut interrupted = queued("b", json!(1), ConflictPolicy::ServerWins);
        interrupted.mark_syncing();
        f.queue.add(failed).await.unwrap();
        f.queue.add(interrupted).await.unwrap();

        assert_eq!(f.replayer.retry_failed().await.unwrap(), 1);
        assert_eq!(f.replayer.recover_interrupted().await.unwrap(), 1);
        assert!(f
            .queue
            .get_items()
            .await
            .unwrap()
            .iter()
            .all(|m| m.status == MutationStatus::Queued && m.retry_count == 0));

        assert_eq!(f.replayer.clear_queue().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_process_unknown_item_fails() {
        let f = fixture();
        assert!(matches!(
            f.replayer.process_item("missing").await,
            Err(SyncError::Queue(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_replays_on_reconnect() {
        let f = fixture();
        f.connectivity.set_online(false);
        f.queue.add(queued("k", json!(1), ConflictPolicy::ServerWins)).await.unwrap();

        let (processor, handle) = ReplayProcessor::new(
            f.replayer.clone(),
            f.connectivity.clone(),
            f.emitter.clone(),
            Duration::from_secs(3600),
        );
        let task = tokio::spawn(processor.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.queue.len().await.unwrap(), 1);

        f.connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.queue.len().await.unwrap(), 0);
        assert_eq!(f.emitter.connectivity(), vec![true]);

        let summary = handle.sync_now().await.unwrap();
        assert_eq!(summary.remaining, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}

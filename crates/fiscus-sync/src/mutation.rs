//! # Write Coordinator
//!
//! Orchestrates one logical write: optimistic projection, delivery, queue
//! fallback and reconciliation.
//!
//! ## Mutation State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Idle ──mutate()──► Mutating ─┬─ offline + queue ──────────► Queued    │
//! │                        │       │                                        │
//! │     optimistic fn? ────┘       ├─ delivered ────────────────► Success   │
//! │     snapshot key, write        │                                        │
//! │     projection, arm revert     ├─ transient failure + queue ► Queued    │
//! │     timer                      │                                        │
//! │                                └─ otherwise (after retries) ► Error     │
//! │                                     rollback_on_error: restore snapshot │
//! │                                                                         │
//! │   revert timer fires before resolution ──► restore snapshot             │
//! │   reset() ──► cancels revert timer and pending retries ──► Idle         │
//! │                                                                         │
//! │   Queued ──replay acknowledged──► Success                               │
//! │          ──replay exhausted────► Error                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The revert timer and every resolution take the same per-mutation lock and
//! compare an epoch, so a late success never loses to a revert that fires a
//! moment earlier, and a revert never undoes a resolved mutation.

use std::sync::Arc;
use std::time::Duration;

use fiscus_cache::SetOptions;
use fiscus_core::{CacheEntry, ConflictPolicy, MutationKind, MutationPriority, QueuedMutation};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::config::MutationSettings;
use crate::error::{SyncError, SyncResult};
use crate::query::ReadCoordinator;
use crate::replay::{ReplayOutcome, Replayer};
use crate::retry::{retry_while_online, RetryDelay, RetryPolicy};

/// Computes the optimistic projection from the mutation variables and the
/// value currently cached under the target key.
pub type OptimisticFn = Arc<dyn Fn(&Value, Option<&Value>) -> Value + Send + Sync>;

// =============================================================================
// Mutation Options
// =============================================================================

#[derive(Clone)]
pub struct MutationOptions {
    pub kind: MutationKind,
    pub resource_type: String,
    /// Key that receives the optimistic projection and the server result.
    pub cache_key: Option<String>,
    pub optimistic: Option<OptimisticFn>,
    /// Query key prefixes invalidated once the server acknowledges the write.
    pub invalidates: Vec<String>,
    pub priority: MutationPriority,
    pub conflict_policy: ConflictPolicy,
    /// Overrides the configured online retry count.
    pub retry: Option<RetryPolicy>,
    pub rollback_on_error: Option<bool>,
    pub offline_queue: Option<bool>,
    pub optimistic_timeout: Option<Duration>,
}

impl MutationOptions {
    pub fn new(kind: MutationKind, resource_type: impl Into<String>) -> Self {
        MutationOptions {
            kind,
            resource_type: resource_type.into(),
            cache_key: None,
            optimistic: None,
            invalidates: Vec::new(),
            priority: MutationPriority::default(),
            conflict_policy: ConflictPolicy::default(),
            retry: None,
            rollback_on_error: None,
            offline_queue: None,
            optimistic_timeout: None,
        }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn optimistic<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, Option<&Value>) -> Value + Send + Sync + 'static,
    {
        self.optimistic = Some(Arc::new(f));
        self
    }

    pub fn invalidates(mut self, prefix: impl Into<String>) -> Self {
        self.invalidates.push(prefix.into());
        self
    }

    pub fn priority(mut self, priority: MutationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = Some(rollback);
        self
    }

    pub fn offline_queue(mut self, enabled: bool) -> Self {
        self.offline_queue = Some(enabled);
        self
    }

    pub fn optimistic_timeout(mut self, timeout: Duration) -> Self {
        self.optimistic_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    #[default]
    Idle,
    Mutating,
    /// Accepted locally; delivery happens on replay.
    Queued,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The server acknowledged the write and returned `data`.
    Success { data: Value },
    /// The write is in the offline queue under `id`.
    Queued { id: String, optimistic: Option<Value> },
}

impl MutationOutcome {
    /// The value the caller should show: server data, or the optimistic
    /// projection while queued.
    pub fn data(&self) -> Option<&Value> {
        match self {
            MutationOutcome::Success { data } => Some(data),
            MutationOutcome::Queued { optimistic, .. } => optimistic.as_ref(),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued { .. })
    }
}

// =============================================================================
// Write Coordinator
// =============================================================================

struct WriteInner {
    reads: ReadCoordinator,
    replayer: Replayer,
    settings: MutationSettings,
    queue_max_retries: u32,
    delay: RetryDelay,
}

#[derive(Clone)]
pub struct WriteCoordinator {
    inner: Arc<WriteInner>,
}

impl WriteCoordinator {
    pub fn new(
        reads: ReadCoordinator,
        replayer: Replayer,
        settings: MutationSettings,
        queue_max_retries: u32,
        delay: RetryDelay,
    ) -> Self {
        WriteCoordinator {
            inner: Arc::new(WriteInner {
                reads,
                replayer,
                settings,
                queue_max_retries,
                delay,
            }),
        }
    }

    /// Creates a mutation handle for one kind of write.
    pub fn mutation(&self, options: MutationOptions) -> Mutation {
        Mutation {
            inner: self.inner.clone(),
            options: Arc::new(options),
            runtime: Arc::new(Mutex::new(Runtime::default())),
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Re-attempts delivery of one queued mutation outside the replay schedule.
    pub async fn force_sync(&self, queue_id: &str) -> SyncResult<ReplayOutcome> {
        info!(id = %queue_id, "Forcing sync of queued mutation");
        self.inner.replayer.process_item(queue_id).await
    }

    pub async fn pending(&self) -> SyncResult<Vec<QueuedMutation>> {
        self.inner.replayer.queue().get_items().await
    }
}

// =============================================================================
// Mutation Handle
// =============================================================================

struct Rollback {
    key: String,
    entry: Option<CacheEntry>,
}

/// The value written optimistically and the one it replaced.
struct Projection {
    value: Value,
    previous: Option<Value>,
}

#[derive(Default)]
struct Runtime {
    state: MutationState,
    optimistic: bool,
    failure_count: u32,
    last_error: Option<SyncError>,
    queued_id: Option<String>,
    /// Bumped by every `mutate` and `reset`; stale resolutions are ignored.
    epoch: u64,
    rollback: Option<Rollback>,
    revert: Option<AbortHandle>,
    /// Follows the queued write through replay.
    replay_watch: Option<AbortHandle>,
}

impl Runtime {
    fn cancel_revert(&mut self) {
        if let Some(timer) = self.revert.take() {
            timer.abort();
        }
    }

    fn cancel_replay_watch(&mut self) {
        if let Some(watch) = self.replay_watch.take() {
            watch.abort();
        }
    }
}

/// A reusable write. One `mutate` at a time; a newer call supersedes the
/// bookkeeping of an older one.
#[derive(Clone)]
pub struct Mutation {
    inner: Arc<WriteInner>,
    options: Arc<MutationOptions>,
    runtime: Arc<Mutex<Runtime>>,
    cancel: Arc<Notify>,
}

impl Mutation {
    pub async fn mutate(&self, variables: Value) -> SyncResult<MutationOutcome> {
        let epoch = self.begin().await;

        let projection = match self.apply_optimistic(&variables, epoch).await {
            Ok(projection) => projection,
            Err(e) => return Err(self.fail(epoch, e, 0).await),
        };
        let optimistic = projection.as_ref().map(|p| p.value.clone());
        let mutation = self.build(variables, projection);

        if !self.inner.reads.connectivity().is_online() {
            if self.queue_enabled() {
                return self.enqueue(mutation, epoch, optimistic).await;
            }
            return Err(self.fail(epoch, SyncError::network("Device is offline"), 0).await);
        }

        let transport = self.inner.replayer.transport();
        let retry = self
            .options
            .retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::from(self.inner.settings.max_retries));
        let mut failures = 0;

        let delivery = retry_while_online(
            || transport.deliver(&mutation),
            &retry,
            self.inner.delay,
            self.inner.reads.connectivity(),
            |count, error| {
                failures = count;
                debug!(id = %mutation.id, attempt = count, error = %error, "Mutation attempt failed");
            },
        );
        let result = tokio::select! {
            result = delivery => result,
            _ = self.cancel.notified() => {
                debug!(id = %mutation.id, "Mutation reset while delivering");
                return Err(SyncError::Cancelled { key: mutation.id.clone() });
            }
        };

        match result {
            Ok(data) => self.succeed(epoch, data).await,
            Err(error) if self.queue_enabled() && error.is_retryable() => {
                debug!(id = %mutation.id, error = %error, "Delivery failed, falling back to queue");
                self.runtime.lock().await.failure_count = failures;
                self.enqueue(mutation, epoch, optimistic).await
            }
            Err(error) => Err(self.fail(epoch, error, failures).await),
        }
    }

    pub async fn state(&self) -> MutationState {
        self.runtime.lock().await.state
    }

    /// True while an unconfirmed optimistic projection is in the cache.
    pub async fn is_optimistic(&self) -> bool {
        self.runtime.lock().await.optimistic
    }

    pub async fn failure_count(&self) -> u32 {
        self.runtime.lock().await.failure_count
    }

    pub async fn last_error(&self) -> Option<SyncError> {
        self.runtime.lock().await.last_error.clone()
    }

    /// Queue id of the last write that went to the offline queue.
    pub async fn queued_id(&self) -> Option<String> {
        self.runtime.lock().await.queued_id.clone()
    }

    /// Back to `Idle`. Cancels the revert timer and any retry in progress.
    /// The cache is left as it is.
    pub async fn reset(&self) {
        let mut rt = self.runtime.lock().await;
        rt.cancel_revert();
        rt.cancel_replay_watch();
        let epoch = rt.epoch + 1;
        *rt = Runtime {
            epoch,
            ..Runtime::default()
        };
        self.cancel.notify_waiters();
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn begin(&self) -> u64 {
        let mut rt = self.runtime.lock().await;
        rt.cancel_revert();
        rt.cancel_replay_watch();
        rt.epoch += 1;
        rt.state = MutationState::Mutating;
        rt.optimistic = false;
        rt.failure_count = 0;
        rt.last_error = None;
        rt.queued_id = None;
        rt.rollback = None;
        rt.epoch
    }

    async fn apply_optimistic(
        &self,
        variables: &Value,
        epoch: u64,
    ) -> SyncResult<Option<Projection>> {
        let (Some(update), Some(key)) = (&self.options.optimistic, &self.options.cache_key) else {
            return Ok(None);
        };
        let cache = self.inner.reads.cache();

        let mut rt = self.runtime.lock().await;
        let entry = cache.entry_snapshot(key).await;
        let current = cache.peek_stale(key).await;
        let projection = update(variables, current.as_ref());
        cache.set(key, projection.clone(), SetOptions::default()).await?;

        rt.rollback = Some(Rollback {
            key: key.clone(),
            entry,
        });
        rt.optimistic = true;
        rt.revert = Some(self.arm_revert(epoch));
        debug!(key = %key, "Optimistic projection applied");

        Ok(Some(Projection {
            value: projection,
            previous: current,
        }))
    }

    fn arm_revert(&self, epoch: u64) -> AbortHandle {
        let timeout = self
            .options
            .optimistic_timeout
            .unwrap_or_else(|| Duration::from_millis(self.inner.settings.optimistic_timeout_ms));
        let runtime = self.runtime.clone();
        let cache = self.inner.reads.cache().clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut rt = runtime.lock().await;
            if rt.epoch != epoch {
                return;
            }
            if let Some(rollback) = rt.rollback.take() {
                warn!(key = %rollback.key, ?timeout, "Optimistic update unresolved, reverting");
                cache.restore_entry(&rollback.key, rollback.entry).await;
                rt.optimistic = false;
            }
            rt.revert = None;
        })
        .abort_handle()
    }

    fn build(&self, variables: Value, projection: Option<Projection>) -> QueuedMutation {
        let options = &self.options;
        let (optimistic, previous) = match projection {
            Some(p) => (Some(p.value), p.previous),
            None => (None, None),
        };
        QueuedMutation::new(options.kind, options.resource_type.clone(), variables)
            .with_priority(options.priority)
            .with_conflict_policy(options.conflict_policy)
            .with_max_retries(self.inner.queue_max_retries)
            .with_cache_key(options.cache_key.clone())
            .with_optimistic(optimistic)
            .with_previous(previous)
            .with_invalidates(options.invalidates.clone())
    }

    async fn enqueue(
        &self,
        mut mutation: QueuedMutation,
        epoch: u64,
        projection: Option<Value>,
    ) -> SyncResult<MutationOutcome> {
        mutation.mark_queued();
        let id = mutation.id.clone();
        let resource_type = mutation.resource_type.clone();

        // Subscribed before the add so a replay right after it is not missed
        let outcomes = self.inner.replayer.subscribe();
        if let Err(e) = self.inner.replayer.queue().add(mutation).await {
            return Err(self.fail(epoch, e, 0).await);
        }

        let mut rt = self.runtime.lock().await;
        if rt.epoch == epoch {
            // The projection stands until replay reconciles it
            rt.cancel_revert();
            rt.rollback = None;
            rt.state = MutationState::Queued;
            rt.queued_id = Some(id.clone());
            rt.replay_watch = Some(self.watch_replay(id.clone(), epoch, outcomes));
        }
        info!(id = %id, resource_type = %resource_type, "Mutation queued for replay");

        Ok(MutationOutcome::Queued {
            id,
            optimistic: projection,
        })
    }

    /// Moves a queued handle to `Success` or `Error` once replay settles the
    /// item. Intermediate failures only update the failure bookkeeping.
    fn watch_replay(
        &self,
        id: String,
        epoch: u64,
        mut outcomes: broadcast::Receiver<ReplayOutcome>,
    ) -> AbortHandle {
        let runtime = self.runtime.clone();

        tokio::spawn(async move {
            loop {
                let outcome = match outcomes.recv().await {
                    Ok(outcome) if outcome.id() == id => outcome,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(id = %id, skipped, "Replay outcomes dropped while watching mutation");
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };

                let mut rt = runtime.lock().await;
                if rt.epoch != epoch {
                    return;
                }
                match outcome {
                    ReplayOutcome::Failed { error, .. } => {
                        rt.failure_count += 1;
                        rt.last_error = Some(error);
                        continue;
                    }
                    ReplayOutcome::Synced { .. } => {
                        rt.state = MutationState::Success;
                        rt.failure_count = 0;
                        rt.last_error = None;
                        debug!(id = %id, "Queued mutation confirmed by replay");
                    }
                    ReplayOutcome::Exhausted { error, .. } => {
                        rt.state = MutationState::Error;
                        rt.last_error = Some(error);
                        debug!(id = %id, "Queued mutation given up by replay");
                    }
                }
                rt.optimistic = false;
                rt.replay_watch = None;
                return;
            }
        })
        .abort_handle()
    }

    async fn succeed(&self, epoch: u64, data: Value) -> SyncResult<MutationOutcome> {
        let mut rt = self.runtime.lock().await;
        let current = rt.epoch == epoch;
        if current {
            rt.cancel_revert();
            rt.rollback = None;
            rt.optimistic = false;
        }

        for prefix in &self.options.invalidates {
            self.inner.reads.invalidate_queries(prefix).await;
        }
        if let Some(key) = &self.options.cache_key {
            if let Err(e) = self.inner.reads.set_query_data(key, data.clone()).await {
                warn!(key = %key, error = %e, "Failed to cache mutation result");
            }
        }

        if current {
            rt.state = MutationState::Success;
            rt.failure_count = 0;
            rt.last_error = None;
        }
        info!(resource_type = %self.options.resource_type, "Mutation delivered");

        Ok(MutationOutcome::Success { data })
    }

    /// Resolves the current call as failed and returns the error to surface.
    async fn fail(&self, epoch: u64, error: SyncError, failures: u32) -> SyncError {
        let mut rt = self.runtime.lock().await;
        if rt.epoch != epoch {
            return error;
        }

        rt.cancel_revert();
        if let Some(rollback) = rt.rollback.take() {
            if self.rollback_enabled() {
                self.inner
                    .reads
                    .cache()
                    .restore_entry(&rollback.key, rollback.entry)
                    .await;
                rt.optimistic = false;
                info!(key = %rollback.key, "Optimistic update rolled back");
            }
        }

        rt.state = MutationState::Error;
        rt.failure_count = failures;
        rt.last_error = Some(error.clone());
        warn!(resource_type = %self.options.resource_type, error = %error, "Mutation failed");
        error
    }

    fn queue_enabled(&self) -> bool {
        self.options
            .offline_queue
            .unwrap_or(self.inner.settings.enable_offline_queue)
    }

    fn rollback_enabled(&self) -> bool {
        self.options
            .rollback_on_error
            .unwrap_or(self.inner.settings.rollback_on_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuerySettings;
    use crate::connectivity::ConnectivityMonitor;
    use crate::queue::{MemoryQueue, MutationQueue};
    use crate::test_support::{test_cache, RecordingEmitter, ScriptedTransport};
    use fiscus_core::ManualClock;
    use serde_json::json;

    struct Fixture {
        writes: WriteCoordinator,
        reads: ReadCoordinator,
        replayer: Replayer,
        queue: Arc<MemoryQueue>,
        transport: Arc<ScriptedTransport>,
        connectivity: ConnectivityMonitor,
        _clock: Arc<ManualClock>,
    }

    fn fixture(online: bool) -> Fixture {
        let (cache, clock) = test_cache();
        let connectivity = ConnectivityMonitor::new(online);
        let reads = ReadCoordinator::new(cache, None, connectivity.clone(), QuerySettings::default());
        let queue = Arc::new(MemoryQueue::new());
        let transport = Arc::new(ScriptedTransport::new());
        let replayer = Replayer::new(
            queue.clone(),
            transport.clone(),
            reads.clone(),
            Arc::new(RecordingEmitter::default()),
            None,
        );
        let writes = WriteCoordinator::new(
            reads.clone(),
            replayer.clone(),
            MutationSettings::default(),
            5,
            RetryDelay::from_millis(10, 100),
        );
        Fixture {
            writes,
            reads,
            replayer,
            queue,
            transport,
            connectivity,
            _clock: clock,
        }
    }

    /// Lets spawned replay watchers observe what was just broadcast.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn receipt_options() -> MutationOptions {
        MutationOptions::new(MutationKind::Update, "receipt")
            .cache_key("receipt:1")
            .optimistic(|vars, current| {
                let mut next = current.cloned().unwrap_or_else(|| json!({}));
                next["total"] = vars["total"].clone();
                next["pending"] = json!(true);
                next
            })
            .invalidates("receipts:")
    }

    #[tokio::test]
    async fn test_offline_mutation_queues_once_then_replays() {
        let f = fixture(false);
        f.reads.set_query_data("receipt:1", json!({"total": 5})).await.unwrap();
        let mutation = f.writes.mutation(receipt_options());

        let outcome = mutation.mutate(json!({"total": 9})).await.unwrap();
        let projection = json!({"total": 9, "pending": true});
        assert!(outcome.is_queued());
        assert_eq!(outcome.data(), Some(&projection));
        assert_eq!(mutation.state().await, MutationState::Queued);
        assert!(mutation.is_optimistic().await);
        assert_eq!(f.queue.len().await.unwrap(), 1);
        assert_eq!(f.reads.get_query_data("receipt:1").await, Some(projection));

        f.connectivity.set_online(true);
        f.transport.push_ok(json!({"total": 9, "number": "2024-0001"}));
        let summary = f.replayer.process_all().await.unwrap();

        assert_eq!(summary.synced, 1);
        assert_eq!(f.queue.len().await.unwrap(), 0);
        assert_eq!(
            f.reads.get_query_data("receipt:1").await,
            Some(json!({"total": 9, "number": "2024-0001"}))
        );

        settle().await;
        assert_eq!(mutation.state().await, MutationState::Success);
        assert!(!mutation.is_optimistic().await);
        assert!(mutation.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_queued_item_remembers_replaced_value() {
        let f = fixture(false);
        f.reads.set_query_data("receipt:1", json!({"total": 5})).await.unwrap();
        let mutation = f.writes.mutation(receipt_options());

        mutation.mutate(json!({"total": 9})).await.unwrap();
        let items = f.queue.get_items().await.unwrap();
        assert_eq!(items[0].previous, Some(json!({"total": 5})));
        assert_eq!(items[0].optimistic, Some(json!({"total": 9, "pending": true})));
    }

    #[tokio::test]
    async fn test_exhausted_replay_moves_handle_to_error() {
        let f = fixture(false);
        f.reads.set_query_data("receipt:1", json!({"total": 5})).await.unwrap();
        let mutation = f.writes.mutation(receipt_options());
        mutation.mutate(json!({"total": 9})).await.unwrap();

        f.connectivity.set_online(true);
        f.transport.push_err(SyncError::network("timeout"));
        f.replayer.process_all().await.unwrap();
        settle().await;
        assert_eq!(mutation.state().await, MutationState::Queued);
        assert_eq!(mutation.failure_count().await, 1);
        assert!(mutation.is_optimistic().await);

        f.transport.push_err(SyncError::http(422, "invalid VAT"));
        let summary = f.replayer.process_all().await.unwrap();
        assert_eq!(summary.exhausted, 1);

        settle().await;
        assert_eq!(mutation.state().await, MutationState::Error);
        assert!(!mutation.is_optimistic().await);
        assert!(matches!(
            mutation.last_error().await,
            Some(SyncError::QueueExhausted { attempts: 2, .. })
        ));
        assert_eq!(f.reads.get_query_data("receipt:1").await, Some(json!({"total": 5})));
    }

    #[tokio::test]
    async fn test_reset_detaches_queued_handle() {
        let f = fixture(false);
        let mutation = f.writes.mutation(receipt_options());
        mutation.mutate(json!({"total": 9})).await.unwrap();
        mutation.reset().await;

        f.connectivity.set_online(true);
        f.replayer.process_all().await.unwrap();
        settle().await;
        assert_eq!(mutation.state().await, MutationState::Idle);
        assert!(mutation.queued_id().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_exactly() {
        let f = fixture(true);
        f.reads.set_query_data("receipt:1", json!({"total": 5})).await.unwrap();
        let before = f.reads.cache().entry_snapshot("receipt:1").await;
        assert!(before.is_some());

        f.transport.push_err(SyncError::http(500, "boom"));
        let mutation = f.writes.mutation(
            receipt_options()
                .offline_queue(false)
                .rollback_on_error(true),
        );

        let err = mutation.mutate(json!({"total": 9})).await.unwrap_err();
        assert_eq!(err, SyncError::http(500, "boom"));
        assert_eq!(f.reads.cache().entry_snapshot("receipt:1").await, before);
        assert_eq!(mutation.state().await, MutationState::Error);
        assert!(!mutation.is_optimistic().await);
        assert_eq!(mutation.failure_count().await, 1);
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_of_new_key_removes_it() {
        let f = fixture(true);
        f.transport.push_err(SyncError::http(500, "boom"));
        let mutation = f.writes.mutation(receipt_options().offline_queue(false));

        mutation.mutate(json!({"total": 9})).await.unwrap_err();
        assert!(f.reads.cache().entry_snapshot("receipt:1").await.is_none());
    }

    #[tokio::test]
    async fn test_rejection_is_not_queued() {
        let f = fixture(true);
        f.transport.push_err(SyncError::http(422, "invalid VAT"));
        let mutation = f.writes.mutation(receipt_options());

        let err = mutation.mutate(json!({"total": 9})).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(f.queue.len().await.unwrap(), 0);
        assert_eq!(mutation.state().await, MutationState::Error);
    }

    #[tokio::test]
    async fn test_transient_failure_falls_back_to_queue() {
        let f = fixture(true);
        f.transport.push_err(SyncError::network("reset by peer"));
        let mutation = f.writes.mutation(receipt_options());

        let outcome = mutation.mutate(json!({"total": 9})).await.unwrap();
        assert!(outcome.is_queued());
        assert_eq!(mutation.failure_count().await, 1);
        let items = f.queue.get_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(mutation.queued_id().await, Some(items[0].id.clone()));
    }

    #[tokio::test]
    async fn test_online_success_writes_server_data_and_invalidates() {
        let f = fixture(true);
        f.reads.set_query_data("receipts:list", json!([])).await.unwrap();
        f.transport.push_ok(json!({"total": 9, "number": "0002"}));
        let mutation = f.writes.mutation(receipt_options());

        let outcome = mutation.mutate(json!({"total": 9})).await.unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::Success {
                data: json!({"total": 9, "number": "0002"})
            }
        );
        assert_eq!(mutation.state().await, MutationState::Success);
        assert!(!mutation.is_optimistic().await);
        assert_eq!(f.reads.get_query_data("receipts:list").await, None);
        assert_eq!(
            f.reads.get_query_data("receipt:1").await,
            Some(json!({"total": 9, "number": "0002"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_applies_online() {
        let f = fixture(true);
        f.transport.push_err(SyncError::network("flaky"));
        f.transport.push_err(SyncError::network("flaky"));
        f.transport.push_ok(json!("ok"));
        let mutation = f
            .writes
            .mutation(receipt_options().offline_queue(false).retry(3u32));

        let outcome = mutation.mutate(json!({"total": 1})).await.unwrap();
        assert_eq!(outcome.data(), Some(&json!("ok")));
        assert_eq!(mutation.failure_count().await, 0);
        assert_eq!(f.transport.deliveries().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_timer_restores_then_late_success_wins() {
        let f = fixture(true);
        f.reads.set_query_data("receipt:1", json!({"total": 5})).await.unwrap();
        f.transport.set_delay(Duration::from_secs(1));
        f.transport.push_ok(json!({"total": 9, "confirmed": true}));
        let mutation = f.writes.mutation(
            receipt_options().optimistic_timeout(Duration::from_millis(100)),
        );

        let task = {
            let mutation = mutation.clone();
            tokio::spawn(async move { mutation.mutate(json!({"total": 9})).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mutation.is_optimistic().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!mutation.is_optimistic().await);
        assert_eq!(f.reads.get_query_data("receipt:1").await, Some(json!({"total": 5})));

        task.await.unwrap().unwrap();
        assert_eq!(
            f.reads.get_query_data("receipt:1").await,
            Some(json!({"total": 9, "confirmed": true}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_cancels_revert_timer() {
        let f = fixture(true);
        let mutation = f.writes.mutation(
            receipt_options().optimistic_timeout(Duration::from_millis(100)),
        );
        f.transport.push_ok(json!({"total": 3}));

        mutation.mutate(json!({"total": 3})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.reads.get_query_data("receipt:1").await, Some(json!({"total": 3})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_delivery() {
        let f = fixture(true);
        f.transport.set_delay(Duration::from_secs(10));
        let mutation = f.writes.mutation(receipt_options());

        let task = {
            let mutation = mutation.clone();
            tokio::spawn(async move { mutation.mutate(json!({"total": 9})).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        mutation.reset().await;

        assert!(matches!(
            task.await.unwrap(),
            Err(SyncError::Cancelled { .. })
        ));
        assert_eq!(mutation.state().await, MutationState::Idle);
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_force_sync_delivers_queued_item() {
        let f = fixture(false);
        let mutation = f.writes.mutation(receipt_options());
        let outcome = mutation.mutate(json!({"total": 4})).await.unwrap();
        let MutationOutcome::Queued { id, .. } = outcome else {
            panic!("expected a queued outcome");
        };

        f.connectivity.set_online(true);
        f.transport.push_ok(json!({"total": 4, "pending": true}));
        let replayed = f.writes.force_sync(&id).await.unwrap();

        assert!(matches!(replayed, ReplayOutcome::Synced { conflict: None, .. }));
        assert!(f.writes.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_without_queue_fails() {
        let f = fixture(false);
        let mutation = f.writes.mutation(receipt_options().offline_queue(false));

        let err = mutation.mutate(json!({"total": 1})).await.unwrap_err();
        assert!(err.is_network_error());
        assert!(f.transport.deliveries().is_empty());
        assert!(f.reads.get_query_data("receipt:1").await.is_none());
    }
}

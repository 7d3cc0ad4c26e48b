//! # Read Coordinator
//!
//! Orchestrates one logical read across the three tiers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  query(key, fetcher, options)                                           │
//! │                                                                         │
//! │  1. memory     fresh hit? ───────────────────────────────► return       │
//! │                (skipped for network-first while online)    (+ optional  │
//! │                                                             background  │
//! │                                                             refresh)    │
//! │  2. durable    record? ──► promote into memory ──────────► return       │
//! │                                                                         │
//! │  3. offline?   stale memory copy ────────────────────────► return stale │
//! │                nothing at all ───────────────────────────► NoDataOffline│
//! │                                                                         │
//! │  4. network    join in-flight fetch for key, or start one               │
//! │                  ok  ──► memory + durable ───────────────► return       │
//! │                  err ──► any stale copy? ────────────────► return stale │
//! │                          none ───────────────────────────► error        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## In-flight De-duplication
//!
//! Each network fetch runs as its own task. Concurrent reads of a cold key
//! join the same `Shared` future, so N readers cost one request. A forced
//! read aborts the running task; everyone still waiting on it receives
//! [`SyncError::Cancelled`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fiscus_cache::{CacheHandle, DurableRecord, Lookup, PersistenceBridge, SetOptions};
use fiscus_core::NetworkPolicy;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use ts_rs::TS;

use crate::config::QuerySettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::retry::{retry_while_online, RetryDelay, RetryPolicy};
use crate::transport::Fetcher;

// =============================================================================
// Query Types
// =============================================================================

/// Per-call read options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides the configured network policy.
    pub policy: Option<NetworkPolicy>,
    /// Cache-first only: refresh in the background after a memory hit.
    pub revalidate: bool,
    /// Skip the cache tiers and supersede any fetch already in flight.
    pub force: bool,
    /// Overrides the configured retry count.
    pub retry: Option<RetryPolicy>,
    /// How fetched data is stored in memory.
    pub cache: SetOptions,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: NetworkPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn revalidate(mut self) -> Self {
        self.revalidate = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn cache(mut self, cache: SetOptions) -> Self {
        self.cache = cache;
        self
    }
}

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Memory,
    Durable,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub data: Value,
    pub source: DataSource,
    /// True when the value is a fallback served because fresh data was
    /// unavailable.
    pub stale: bool,
    /// The fetch failure absorbed by a stale fallback.
    pub error: Option<SyncError>,
}

impl QueryResult {
    fn fresh(data: Value, source: DataSource) -> Self {
        QueryResult {
            data,
            source,
            stale: false,
            error: None,
        }
    }

    fn stale(data: Value, source: DataSource, error: Option<SyncError>) -> Self {
        QueryResult {
            data,
            source,
            stale: true,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Idle,
    Fetching,
    Success,
    Error,
}

/// Introspection state of one query key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub status: QueryStatus,
    /// Failed attempts of the latest fetch. Reset to 0 on success.
    pub failure_count: u32,
    pub last_error: Option<SyncError>,
    /// Clock time (ms) of the last successful fetch or manual write.
    pub data_updated_at: Option<u64>,
    /// True while the last answer was a stale fallback.
    pub is_stale: bool,
}

// =============================================================================
// Read Coordinator
// =============================================================================

type SharedFetch = Shared<BoxFuture<'static, SyncResult<Value>>>;

struct InFlight {
    id: u64,
    future: SharedFetch,
    abort: AbortHandle,
}

struct ReadInner {
    cache: CacheHandle,
    persistence: Option<PersistenceBridge>,
    connectivity: ConnectivityMonitor,
    settings: QuerySettings,
    in_flight: Mutex<HashMap<String, InFlight>>,
    states: Mutex<HashMap<String, QueryState>>,
    next_fetch_id: AtomicU64,
}

#[derive(Clone)]
pub struct ReadCoordinator {
    inner: Arc<ReadInner>,
}

impl ReadCoordinator {
    pub fn new(
        cache: CacheHandle,
        persistence: Option<PersistenceBridge>,
        connectivity: ConnectivityMonitor,
        settings: QuerySettings,
    ) -> Self {
        ReadCoordinator {
            inner: Arc::new(ReadInner {
                cache,
                persistence,
                connectivity,
                settings,
                in_flight: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.inner.cache
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Reads `key` through memory, durable storage and the network.
    pub async fn query(
        &self,
        key: &str,
        fetcher: Fetcher,
        options: QueryOptions,
    ) -> SyncResult<QueryResult> {
        let policy = options.policy.unwrap_or(self.inner.settings.network_policy);
        let online = self.inner.connectivity.is_online();
        let skip_cache = options.force || policy == NetworkPolicy::NetworkFirst;

        // Memory tier. Offline reads always look here first.
        let mut stale_memory = None;
        let mut memory_expired = false;
        if !skip_cache || !online {
            match self.inner.cache.lookup(key).await {
                Lookup::Hit(data) => {
                    if online && options.revalidate && policy == NetworkPolicy::CacheFirst {
                        debug!(key = %key, "Revalidating cached query in background");
                        // The fetch task runs on its own; nobody waits on it here
                        let _ = self.join_or_start(key, fetcher, &options).await;
                    }
                    self.update_state(key, |s| s.is_stale = false).await;
                    return Ok(QueryResult::fresh(data, DataSource::Memory));
                }
                Lookup::Expired { stale } => {
                    memory_expired = true;
                    stale_memory = stale;
                }
                Lookup::Miss | Lookup::Corrupted => {}
            }
        }

        // Durable tier. An expired memory entry means the data is known
        // stale, so online cache-first reads go to the network instead.
        let record = self.read_durable(key).await;
        if let Some(record) = &record {
            let accept = !online
                || policy == NetworkPolicy::OfflineFirst
                || (!skip_cache && !memory_expired);
            if accept {
                self.promote(key, record, options.cache.clone()).await;
                self.update_state(key, |s| s.is_stale = false).await;
                return Ok(QueryResult::fresh(record.data.clone(), DataSource::Durable));
            }
        }

        if !online {
            let fallback = match stale_memory {
                Some(data) => Some(data),
                None => self.inner.cache.peek_stale(key).await,
            };
            return match fallback {
                Some(data) => {
                    debug!(key = %key, "Offline, serving stale cached value");
                    self.update_state(key, |s| s.is_stale = true).await;
                    Ok(QueryResult::stale(data, DataSource::Memory, None))
                }
                None => Err(SyncError::NoDataOffline {
                    key: key.to_string(),
                }),
            };
        }

        let fetch = self.join_or_start(key, fetcher, &options).await;
        match fetch.await {
            Ok(data) => Ok(QueryResult::fresh(data, DataSource::Network)),
            Err(error @ SyncError::Cancelled { .. }) => Err(error),
            Err(error) => {
                let fallback = match stale_memory {
                    Some(data) => Some((data, DataSource::Memory)),
                    None => match self.inner.cache.peek_stale(key).await {
                        Some(data) => Some((data, DataSource::Memory)),
                        None => record.map(|r| (r.data, DataSource::Durable)),
                    },
                };
                match fallback {
                    Some((data, source)) => {
                        warn!(key = %key, error = %error, "Fetch failed, serving stale value");
                        self.update_state(key, |s| s.is_stale = true).await;
                        Ok(QueryResult::stale(data, source, Some(error)))
                    }
                    None => Err(error),
                }
            }
        }
    }

    /// Warms the cache for `key`. Errors are returned, never cached.
    pub async fn prefetch(&self, key: &str, fetcher: Fetcher) -> SyncResult<()> {
        self.query(key, fetcher, QueryOptions::default()).await.map(|_| ())
    }

    // =========================================================================
    // Manual Cache API
    // =========================================================================

    /// Writes `data` as if a fetch had returned it.
    pub async fn set_query_data(&self, key: &str, data: Value) -> SyncResult<()> {
        self.store_fetched(key, &data, SetOptions::default()).await?;
        let now = self.inner.cache.now_ms();
        self.update_state(key, |s| {
            s.status = QueryStatus::Success;
            s.data_updated_at = Some(now);
            s.is_stale = false;
        })
        .await;
        Ok(())
    }

    pub async fn get_query_data(&self, key: &str) -> Option<Value> {
        self.inner.cache.get(key).await
    }

    /// Drops every query under `prefix` from memory and durable storage and
    /// cancels fetches in flight for those keys.
    pub async fn invalidate_queries(&self, prefix: &str) -> Vec<String> {
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            in_flight.retain(|key, fetch| {
                if key.starts_with(prefix) {
                    debug!(key = %key, "Cancelling in-flight fetch");
                    fetch.abort.abort();
                    false
                } else {
                    true
                }
            });
        }

        let keys = self.inner.cache.invalidate(Some(prefix)).await;

        if let Some(persistence) = &self.inner.persistence {
            if let Err(e) = persistence.delete_records(prefix).await {
                warn!(prefix = %prefix, error = %e, "Failed to delete durable query records");
            }
        }

        self.inner
            .states
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));

        keys
    }

    pub async fn state(&self, key: &str) -> QueryState {
        self.inner
            .states
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if a network fetch for `key` is running.
    pub async fn is_fetching(&self, key: &str) -> bool {
        self.inner.in_flight.lock().await.contains_key(key)
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    async fn join_or_start(&self, key: &str, fetcher: Fetcher, options: &QueryOptions) -> SharedFetch {
        let mut in_flight = self.inner.in_flight.lock().await;

        if !options.force {
            if let Some(existing) = in_flight.get(key) {
                debug!(key = %key, "Joining in-flight fetch");
                return existing.future.clone();
            }
        }

        if let Some(superseded) = in_flight.remove(key) {
            debug!(key = %key, "Superseding in-flight fetch");
            superseded.abort.abort();
        }

        let fetch = self.spawn_fetch(key, fetcher, options);
        let future = fetch.future.clone();
        in_flight.insert(key.to_string(), fetch);
        future
    }

    fn spawn_fetch(&self, key: &str, fetcher: Fetcher, options: &QueryOptions) -> InFlight {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let retry = options
            .retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::from(self.inner.settings.max_retries));
        let set_options = options.cache.clone();

        let this = self.clone();
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = this.run_fetch(&task_key, fetcher, &retry, set_options).await;
            this.finish_fetch(&task_key, id).await;
            result
        });
        let abort = handle.abort_handle();

        let waiter_key = key.to_string();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(SyncError::Cancelled { key: waiter_key }),
                Err(e) => Err(SyncError::Internal(format!("Fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        InFlight { id, future, abort }
    }

    async fn run_fetch(
        &self,
        key: &str,
        fetcher: Fetcher,
        retry: &RetryPolicy,
        set_options: SetOptions,
    ) -> SyncResult<Value> {
        self.update_state(key, |s| s.status = QueryStatus::Fetching).await;

        let settings = &self.inner.settings;
        let delay = RetryDelay::from_millis(settings.retry_base_delay_ms, settings.retry_max_delay_ms);
        let mut failures = 0;

        let result = retry_while_online(
            || fetcher(),
            retry,
            delay,
            &self.inner.connectivity,
            |count, error| {
                failures = count;
                debug!(key = %key, attempt = count, error = %error, "Fetch attempt failed");
            },
        )
        .await;

        match result {
            Ok(data) => {
                if let Err(e) = self.store_fetched(key, &data, set_options).await {
                    warn!(key = %key, error = %e, "Fetched data was not cached");
                }
                let now = self.inner.cache.now_ms();
                self.update_state(key, |s| {
                    s.status = QueryStatus::Success;
                    s.failure_count = 0;
                    s.last_error = None;
                    s.data_updated_at = Some(now);
                    s.is_stale = false;
                })
                .await;
                Ok(data)
            }
            Err(error) => {
                warn!(key = %key, attempts = failures, error = %error, "Fetch failed");
                let recorded = error.clone();
                self.update_state(key, |s| {
                    s.status = QueryStatus::Error;
                    s.failure_count = failures;
                    s.last_error = Some(recorded);
                })
                .await;
                Err(error)
            }
        }
    }

    async fn finish_fetch(&self, key: &str, id: u64) {
        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight.get(key).map(|f| f.id) == Some(id) {
            in_flight.remove(key);
        }
    }

    // =========================================================================
    // Storage Helpers
    // =========================================================================

    /// Writes fresh data to memory and, best effort, to durable storage.
    async fn store_fetched(&self, key: &str, data: &Value, opts: SetOptions) -> SyncResult<()> {
        self.inner.cache.set(key, data.clone(), opts).await?;

        if let Some(persistence) = &self.inner.persistence {
            let now = self.inner.cache.now_ms();
            if let Err(e) = persistence.write_record(key, data, now).await {
                warn!(key = %key, error = %e, "Durable write failed");
            }
        }
        Ok(())
    }

    async fn read_durable(&self, key: &str) -> Option<DurableRecord> {
        let persistence = self.inner.persistence.as_ref()?;
        match persistence.read_record(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Durable read failed");
                None
            }
        }
    }

    async fn promote(&self, key: &str, record: &DurableRecord, opts: SetOptions) {
        debug!(key = %key, stored_at = record.stored_at, "Promoting durable record into memory");
        if let Err(e) = self.inner.cache.set(key, record.data.clone(), opts).await {
            warn!(key = %key, error = %e, "Failed to promote durable record");
        }
    }

    async fn update_state<F>(&self, key: &str, f: F)
    where
        F: FnOnce(&mut QueryState),
    {
        let mut states = self.inner.states.lock().await;
        f(states.entry(key.to_string()).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{counting_fetcher, failing_then, init_test_tracing, test_cache};
    use fiscus_cache::MemoryDurableStore;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn settings() -> QuerySettings {
        QuerySettings {
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 100,
            ..QuerySettings::default()
        }
    }

    fn coordinator(online: bool) -> (ReadCoordinator, PersistenceBridge) {
        let (cache, _clock) = test_cache();
        let bridge = PersistenceBridge::new(MemoryDurableStore::shared(), "test");
        let reads = ReadCoordinator::new(
            cache,
            Some(bridge.clone()),
            ConnectivityMonitor::new(online),
            settings(),
        );
        (reads, bridge)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_retries_then_resets_failure_count() {
        init_test_tracing();
        let (reads, _) = coordinator(true);
        let (fetcher, calls) = failing_then(2, json!({"id": 7}));

        let result = reads
            .query("receipt:7", fetcher, QueryOptions::new().retry(3u32))
            .await
            .unwrap();

        assert_eq!(result.data, json!({"id": 7}));
        assert_eq!(result.source, DataSource::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = reads.state("receipt:7").await;
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.failure_count, 0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_cache_first_serves_memory() {
        let (reads, _) = coordinator(true);
        let (fetcher, calls) = counting_fetcher(json!({"v": 1}));

        reads.query("k", fetcher.clone(), QueryOptions::new()).await.unwrap();
        let second = reads.query("k", fetcher, QueryOptions::new()).await.unwrap();

        assert_eq!(second.source, DataSource::Memory);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_first_always_fetches() {
        let (reads, _) = coordinator(true);
        let (fetcher, calls) = counting_fetcher(json!({"v": 1}));
        let options = QueryOptions::new().policy(NetworkPolicy::NetworkFirst);

        reads.query("k", fetcher.clone(), options.clone()).await.unwrap();
        let second = reads.query("k", fetcher, options).await.unwrap();

        assert_eq!(second.source, DataSource::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_durable_record_is_promoted() {
        let (reads, bridge) = coordinator(true);
        bridge.write_record("k", &json!({"v": "disk"}), 1).await.unwrap();
        let (fetcher, calls) = counting_fetcher(json!({"v": "net"}));

        let result = reads.query("k", fetcher, QueryOptions::new()).await.unwrap();
        assert_eq!(result.source, DataSource::Durable);
        assert_eq!(result.data, json!({"v": "disk"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(reads.get_query_data("k").await, Some(json!({"v": "disk"})));
    }

    #[tokio::test]
    async fn test_offline_without_data_fails() {
        let (reads, _) = coordinator(false);
        let (fetcher, calls) = counting_fetcher(json!({}));

        let err = reads.query("k", fetcher, QueryOptions::new()).await.unwrap_err();
        assert_eq!(err, SyncError::NoDataOffline { key: "k".into() });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offline_network_first_uses_durable() {
        let (reads, bridge) = coordinator(false);
        bridge.write_record("k", &json!(42), 1).await.unwrap();
        let (fetcher, _) = counting_fetcher(json!({}));

        let result = reads
            .query("k", fetcher, QueryOptions::new().policy(NetworkPolicy::NetworkFirst))
            .await
            .unwrap();
        assert_eq!(result.data, json!(42));
        assert_eq!(result.source, DataSource::Durable);
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back_to_stale() {
        let (reads, _) = coordinator(true);
        reads.set_query_data("k", json!("old")).await.unwrap();

        let fetcher = crate::transport::fetcher(|| async { Err(SyncError::network("down")) });
        let result = reads
            .query(
                "k",
                fetcher,
                QueryOptions::new()
                    .policy(NetworkPolicy::NetworkFirst)
                    .retry(0u32),
            )
            .await
            .unwrap();

        assert!(result.stale);
        assert_eq!(result.data, json!("old"));
        assert!(result.error.unwrap().is_network_error());

        let state = reads.state("k").await;
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.failure_count, 1);
        assert!(state.is_stale);
    }

    #[tokio::test]
    async fn test_fetch_failure_without_fallback_surfaces() {
        let (reads, _) = coordinator(true);
        let fetcher = crate::transport::fetcher(|| async { Err(SyncError::http(404, "gone")) });

        let err = reads
            .query("k", fetcher, QueryOptions::new().retry(3u32))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::http(404, "gone"));
        // 4xx is not retried
        assert_eq!(reads.state("k").await.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let (reads, _) = coordinator(true);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let fetcher = crate::transport::fetcher(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("shared"))
            }
        });

        let (a, b, c) = tokio::join!(
            reads.query("k", fetcher.clone(), QueryOptions::new()),
            reads.query("k", fetcher.clone(), QueryOptions::new()),
            reads.query("k", fetcher.clone(), QueryOptions::new()),
        );

        assert_eq!(a.unwrap().data, json!("shared"));
        assert_eq!(b.unwrap().data, json!("shared"));
        assert_eq!(c.unwrap().data, json!("shared"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!reads.is_fetching("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_read_cancels_older_fetch() {
        let (reads, _) = coordinator(true);
        let slow = crate::transport::fetcher(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!("slow"))
        });
        let (fast, _) = counting_fetcher(json!("fast"));

        let first = {
            let reads = reads.clone();
            tokio::spawn(async move { reads.query("k", slow, QueryOptions::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(reads.is_fetching("k").await);

        let forced = reads.query("k", fast, QueryOptions::new().force()).await.unwrap();
        assert_eq!(forced.data, json!("fast"));

        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err, SyncError::Cancelled { key: "k".into() });
        assert_eq!(reads.get_query_data("k").await, Some(json!("fast")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_refreshes_in_background() {
        let (reads, _) = coordinator(true);
        reads.set_query_data("k", json!(1)).await.unwrap();
        let (fetcher, calls) = counting_fetcher(json!(2));

        let result = reads
            .query("k", fetcher, QueryOptions::new().revalidate())
            .await
            .unwrap();
        assert_eq!(result.data, json!(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reads.get_query_data("k").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_invalidate_queries_drops_all_tiers() {
        let (reads, bridge) = coordinator(true);
        reads.set_query_data("receipts:1", json!(1)).await.unwrap();
        reads.set_query_data("receipts:2", json!(2)).await.unwrap();
        reads.set_query_data("customers:1", json!(3)).await.unwrap();

        let keys = reads.invalidate_queries("receipts:").await;
        assert_eq!(keys, vec!["receipts:1".to_string(), "receipts:2".to_string()]);
        assert!(bridge.read_record("receipts:1").await.unwrap().is_none());
        assert!(bridge.read_record("customers:1").await.unwrap().is_some());
        assert_eq!(reads.state("receipts:1").await, QueryState::default());
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let (reads, _) = coordinator(true);
        let (fetcher, _) = counting_fetcher(json!({"warm": true}));

        reads.prefetch("k", fetcher).await.unwrap();
        assert_eq!(reads.get_query_data("k").await, Some(json!({"warm": true})));
    }
}

//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use fiscus_cache::{CacheHandle, EntryStore, StoreConfig};
use fiscus_core::{ManualClock, QueuedMutation};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::events::{ConflictReport, SyncEventEmitter};
use crate::transport::{fetcher, Fetcher, MutationTransport};

/// Installs a tracing subscriber once; `RUST_LOG` controls the output.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh cache on a manual clock.
pub fn test_cache() -> (CacheHandle, Arc<ManualClock>) {
    let clock = ManualClock::new(1_000_000);
    let store = EntryStore::new(
        StoreConfig::default(),
        Arc::new(fiscus_cache::DeflateCodec::default()),
        clock.clone(),
    );
    (CacheHandle::new(store), clock)
}

/// Fetcher that always returns `value` and counts its calls.
pub fn counting_fetcher(value: Value) -> (Fetcher, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let f = fetcher(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move { Ok(value) }
    });
    (f, calls)
}

/// Fetcher that fails with a network error `failures` times, then returns `value`.
pub fn failing_then(failures: u32, value: Value) -> (Fetcher, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let f = fetcher(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            if n < failures {
                Err(SyncError::network(format!("attempt {} failed", n + 1)))
            } else {
                Ok(value)
            }
        }
    });
    (f, calls)
}

/// Transport answering from a script. With no scripted response left it
/// echoes the mutation payload back.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<SyncResult<Value>>>,
    deliveries: Mutex<Vec<QueuedMutation>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, value: Value) {
        self.responses.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_err(&self, error: SyncError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn deliveries(&self) -> Vec<QueuedMutation> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MutationTransport for ScriptedTransport {
    async fn deliver(&self, mutation: &QueuedMutation) -> SyncResult<Value> {
        self.deliveries.lock().unwrap().push(mutation.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(mutation.payload.clone()))
    }
}

/// Emitter that records everything it is told.
#[derive(Default)]
pub struct RecordingEmitter {
    progress: Mutex<Vec<(usize, usize)>>,
    conflicts: Mutex<Vec<ConflictReport>>,
    exhausted: Mutex<Vec<String>>,
    connectivity: Mutex<Vec<bool>>,
}

impl RecordingEmitter {
    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().unwrap().clone()
    }

    pub fn conflicts(&self) -> Vec<ConflictReport> {
        self.conflicts.lock().unwrap().clone()
    }

    pub fn exhausted(&self) -> Vec<String> {
        self.exhausted.lock().unwrap().clone()
    }

    pub fn connectivity(&self) -> Vec<bool> {
        self.connectivity.lock().unwrap().clone()
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit_progress(&self, pending: usize, synced: usize) {
        self.progress.lock().unwrap().push((pending, synced));
    }

    fn emit_conflict(&self, report: &ConflictReport) {
        self.conflicts.lock().unwrap().push(report.clone());
    }

    fn emit_exhausted(&self, mutation: &QueuedMutation) {
        self.exhausted.lock().unwrap().push(mutation.id.clone());
    }

    fn emit_connectivity(&self, online: bool) {
        self.connectivity.lock().unwrap().push(online);
    }
}

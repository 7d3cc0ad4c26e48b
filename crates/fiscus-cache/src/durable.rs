//! # Durable Store
//!
//! The asynchronous key-value collaborator the cache snapshots into and the
//! offline queue lives in. The host supplies the real implementation (a
//! platform keystore, IndexedDB, a file); [`MemoryDurableStore`] backs tests
//! and ephemeral sessions.
//!
//! ## Key Layout
//! ```text
//! <namespace>:cache:snapshot     → versioned snapshot envelope
//! <namespace>:data:<query key>   → { data, stored_at } for durable queries
//! <namespace>:queue:<id>         → one queued mutation
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, CacheResult};

/// Async string key-value storage.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Returns every (key, value) pair whose key starts with `prefix`, sorted by key.
    async fn query(&self, prefix: &str) -> CacheResult<Vec<(String, String)>>;
}

/// Shared durable store handle.
pub type SharedDurableStore = Arc<dyn DurableStore>;

/// In-memory [`DurableStore`].
///
/// Can be switched into a failing mode to exercise storage error paths.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    data: RwLock<BTreeMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes every subsequent call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("durable store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        self.check()?;
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn query(&self, prefix: &str) -> CacheResult<Vec<(String, String)>> {
        self.check()?;
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

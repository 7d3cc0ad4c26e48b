//! # Offline Mutation Queue
//!
//! Holds writes that could not be delivered. Exactly one item exists per
//! logical offline write; it leaves the queue only on server acknowledgment,
//! explicit cancellation, or exhaustion.
//!
//! ## Replay Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  priority ↑ (Critical, High, Normal, Low) → created_at ↑ → id ↑         │
//! │                                                                         │
//! │  Critical  receipt-0002  09:14                                          │
//! │  Critical  receipt-0003  09:15                                          │
//! │  Normal    customer-17   09:02                                          │
//! │  Low       settings      08:55                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`DurableQueue`] keeps each item under `<namespace>:queue:<id>` so fiscal
//! writes survive a restart. [`MemoryQueue`] is for hosts without durable
//! storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fiscus_cache::SharedDurableStore;
use fiscus_core::QueuedMutation;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Sorts items into replay order.
pub fn sort_for_replay(items: &mut [QueuedMutation]) {
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The offline queue collaborator.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Adds an item. An item with the same id is replaced, never duplicated.
    async fn add(&self, item: QueuedMutation) -> SyncResult<()>;

    /// Returns every item in replay order.
    async fn get_items(&self) -> SyncResult<Vec<QueuedMutation>>;

    async fn get(&self, id: &str) -> SyncResult<Option<QueuedMutation>>;

    /// Stores the new state of an existing item.
    async fn update(&self, item: &QueuedMutation) -> SyncResult<()>;

    /// Returns true if the item existed.
    async fn remove(&self, id: &str) -> SyncResult<bool>;

    /// Removes every item. Returns how many were dropped.
    async fn clear(&self) -> SyncResult<usize>;

    async fn len(&self) -> SyncResult<usize> {
        Ok(self.get_items().await?.len())
    }
}

/// Shared queue handle.
pub type SharedQueue = Arc<dyn MutationQueue>;

// =============================================================================
// Memory Queue
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: RwLock<HashMap<String, QueuedMutation>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutationQueue for MemoryQueue {
    async fn add(&self, item: QueuedMutation) -> SyncResult<()> {
        self.items.write().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn get_items(&self) -> SyncResult<Vec<QueuedMutation>> {
        let mut items: Vec<QueuedMutation> = self.items.read().await.values().cloned().collect();
        sort_for_replay(&mut items);
        Ok(items)
    }

    async fn get(&self, id: &str) -> SyncResult<Option<QueuedMutation>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn update(&self, item: &QueuedMutation) -> SyncResult<()> {
        let mut items = self.items.write().await;
        match items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(SyncError::Queue(format!("Unknown queue item {}", item.id))),
        }
    }

    async fn remove(&self, id: &str) -> SyncResult<bool> {
        Ok(self.items.write().await.remove(id).is_some())
    }

    async fn clear(&self) -> SyncResult<usize> {
        let mut items = self.items.write().await;
        let count = items.len();
        items.clear();
        Ok(count)
    }

    async fn len(&self) -> SyncResult<usize> {
        Ok(self.items.read().await.len())
    }
}

// =============================================================================
// Durable Queue
// =============================================================================

/// Queue persisted through the durable key-value store, one key per item.
pub struct DurableQueue {
    store: SharedDurableStore,
    prefix: String,
}

impl DurableQueue {
    pub fn new(store: SharedDurableStore, namespace: &str) -> Self {
        DurableQueue {
            store,
            prefix: format!("{}:queue:", namespace),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn write(&self, item: &QueuedMutation) -> SyncResult<()> {
        let json = serde_json::to_string(item)?;
        self.store.set(&self.key(&item.id), json).await?;
        Ok(())
    }
}

#[async_trait]
impl MutationQueue for DurableQueue {
    async fn add(&self, item: QueuedMutation) -> SyncResult<()> {
        self.write(&item).await?;
        debug!(id = %item.id, resource_type = %item.resource_type, "Mutation persisted to queue");
        Ok(())
    }

    async fn get_items(&self) -> SyncResult<Vec<QueuedMutation>> {
        let rows = self.store.query(&self.prefix).await?;
        let mut items = Vec::with_capacity(rows.len());
        for (key, json) in rows {
            match serde_json::from_str::<QueuedMutation>(&json) {
                Ok(item) => items.push(item),
                // Left in place for an operator; a fiscal write is never dropped silently
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable queue item"),
            }
        }
        sort_for_replay(&mut items);
        Ok(items)
    }

    async fn get(&self, id: &str) -> SyncResult<Option<QueuedMutation>> {
        match self.store.get(&self.key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, item: &QueuedMutation) -> SyncResult<()> {
        if self.store.get(&self.key(&item.id)).await?.is_none() {
            return Err(SyncError::Queue(format!("Unknown queue item {}", item.id)));
        }
        self.write(item).await
    }

    async fn remove(&self, id: &str) -> SyncResult<bool> {
        let key = self.key(id);
        if self.store.get(&key).await?.is_none() {
            return Ok(false);
        }
        self.store.delete(&key).await?;
        Ok(true)
    }

    async fn clear(&self) -> SyncResult<usize> {
        let rows = self.store.query(&self.prefix).await?;
        for (key, _) in &rows {
            self.store.delete(key).await?;
        }
        Ok(rows.len())
    }

    async fn len(&self) -> SyncResult<usize> {
        Ok(self.store.query(&self.prefix).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fiscus_cache::{DurableStore, MemoryDurableStore};
    use fiscus_core::{MutationKind, MutationPriority};
    use serde_json::json;

    fn item(resource: &str, priority: MutationPriority, age_secs: i64) -> QueuedMutation {
        let mut m = QueuedMutation::new(MutationKind::Create, resource, json!({"r": resource}))
            .with_priority(priority);
        m.created_at -= Duration::seconds(age_secs);
        m
    }

    fn sample() -> Vec<QueuedMutation> {
        vec![
            item("settings", MutationPriority::Low, 100),
            item("receipt-3", MutationPriority::Critical, 10),
            item("customer", MutationPriority::Normal, 50),
            item("receipt-2", MutationPriority::Critical, 20),
        ]
    }

    fn resources(items: &[QueuedMutation]) -> Vec<&str> {
        items.iter().map(|m| m.resource_type.as_str()).collect()
    }

    #[tokio::test]
    async fn test_memory_queue_replay_order() {
        let queue = MemoryQueue::new();
        for m in sample() {
            queue.add(m).await.unwrap();
        }

        let items = queue.get_items().await.unwrap();
        assert_eq!(
            resources(&items),
            vec!["receipt-2", "receipt-3", "customer", "settings"]
        );
    }

    #[tokio::test]
    async fn test_add_same_id_does_not_duplicate() {
        let queue = MemoryQueue::new();
        let mut m = item("receipt", MutationPriority::Critical, 0);
        queue.add(m.clone()).await.unwrap();
        m.mark_queued();
        queue.add(m.clone()).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_item_fails() {
        let queue = MemoryQueue::new();
        let m = item("receipt", MutationPriority::Normal, 0);
        assert!(matches!(queue.update(&m).await, Err(SyncError::Queue(_))));
    }

    #[tokio::test]
    async fn test_durable_queue_survives_new_instance() {
        let store = MemoryDurableStore::shared();
        let queue = DurableQueue::new(store.clone(), "pos");
        for m in sample() {
            queue.add(m).await.unwrap();
        }

        let reopened = DurableQueue::new(store.clone(), "pos");
        let items = reopened.get_items().await.unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].resource_type, "receipt-2");

        let mut first = items[0].clone();
        first.record_failure("timeout");
        reopened.update(&first).await.unwrap();
        assert_eq!(
            reopened.get(&first.id).await.unwrap().unwrap().retry_count,
            1
        );

        assert!(reopened.remove(&first.id).await.unwrap());
        assert!(!reopened.remove(&first.id).await.unwrap());
        assert_eq!(reopened.clear().await.unwrap(), 3);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_durable_queue_skips_unreadable_items() {
        let store = MemoryDurableStore::shared();
        let queue = DurableQueue::new(store.clone(), "pos");
        queue.add(item("receipt", MutationPriority::High, 0)).await.unwrap();
        store.set("pos:queue:broken", "{not json".to_string()).await.unwrap();

        assert_eq!(queue.get_items().await.unwrap().len(), 1);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let store = MemoryDurableStore::shared();
        let queue = DurableQueue::new(store.clone(), "pos");
        store.set_failing(true);
        let err = queue.add(item("receipt", MutationPriority::High, 0)).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}

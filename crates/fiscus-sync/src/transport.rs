//! # Network Collaborators
//!
//! The engine never speaks HTTP itself. Reads go through a caller-supplied
//! [`Fetcher`]; writes go through the host's [`MutationTransport`].
//! Failures surface as [`SyncError::Network`], whose status decides whether
//! a retry or a queue fallback makes sense.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use fiscus_core::QueuedMutation;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Produces the authoritative value for one query key.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<Value>> + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Value>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Delivers one write to the server.
#[async_trait]
pub trait MutationTransport: Send + Sync {
    /// Sends the mutation and returns the server's resulting state for it.
    async fn deliver(&self, mutation: &QueuedMutation) -> SyncResult<Value>;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn MutationTransport>;

/// Transport that is never reachable. Every write is queued.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableTransport;

#[async_trait]
impl MutationTransport for UnreachableTransport {
    async fn deliver(&self, mutation: &QueuedMutation) -> SyncResult<Value> {
        Err(SyncError::network(format!(
            "no transport configured for {}",
            mutation.resource_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscus_core::MutationKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetcher_wraps_closure() {
        let f = fetcher(|| async { Ok(json!({"id": 1})) });
        assert_eq!(f().await.unwrap(), json!({"id": 1}));
        assert_eq!(f().await.unwrap(), json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_unreachable_transport() {
        let m = QueuedMutation::new(MutationKind::Create, "receipt", json!({}));
        let err = UnreachableTransport.deliver(&m).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

//! # Connectivity Signal
//!
//! A boolean `is_online` plus change notifications. Where the signal comes
//! from (OS reachability, a browser event, a failed health check) is the
//! host's business; it just calls [`ConnectivityMonitor::set_online`].
//!
//! ```text
//!            set_online(false)              set_online(true)
//!   Online ─────────────────────► Offline ─────────────────────► Online
//!     │                              │                              │
//!     │                              ├─► retry timers cancelled     │
//!     │                              └─► writes go to the queue     │
//!     │                                                             └─► replay
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        ConnectivityMonitor { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the signal. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the device is offline (immediately if it already is).
    pub async fn wait_offline(&self) {
        Self::wait_for(self.subscribe(), false).await
    }

    /// Resolves once the device is online (immediately if it already is).
    pub async fn wait_online(&self) {
        Self::wait_for(self.subscribe(), true).await
    }

    async fn wait_for(mut rx: watch::Receiver<bool>, online: bool) {
        if rx.wait_for(|state| *state == online).await.is_err() {
            // The monitor lives as long as any clone; a closed channel never flips
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

//! # GC Task
//!
//! Runs [`CacheHandle::gc`] on a fixed interval (default 5 minutes).
//! Manual collection stays available through the handle itself.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::handle::CacheHandle;
use crate::store::GcReport;

/// Periodic garbage collector for one cache.
pub struct GcTask {
    cache: CacheHandle,
    period: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the GC task.
#[derive(Clone)]
pub struct GcTaskHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl GcTaskHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> CacheResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| CacheError::ChannelError("Shutdown channel closed".into()))
    }
}

impl GcTask {
    pub fn new(cache: CacheHandle, period: Duration) -> (Self, GcTaskHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = GcTask {
            cache,
            period,
            shutdown_rx,
        };
        (task, GcTaskHandle { shutdown_tx })
    }

    /// Runs the GC loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(period_secs = self.period.as_secs(), "Cache GC starting");

        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.period,
            self.period,
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report: GcReport = self.cache.gc().await;
                    debug!(removed = report.total(), "GC tick");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Cache GC shutting down");
                    break;
                }
            }
        }

        info!("Cache GC stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeflateCodec;
    use crate::store::{EntryStore, SetOptions, StoreConfig};
    use fiscus_core::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_gc_runs_on_interval() {
        let clock = ManualClock::new(0);
        let cache = CacheHandle::new(EntryStore::new(
            StoreConfig::default(),
            Arc::new(DeflateCodec::default()),
            clock.clone(),
        ));
        cache.set("k", json!(1), SetOptions::new().ttl(10)).await.unwrap();
        clock.advance(100);

        let (task, handle) = GcTask::new(cache.clone(), Duration::from_secs(300));
        let join = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len().await, 0);

        handle.shutdown().await.unwrap();
        join.await.unwrap();
    }
}

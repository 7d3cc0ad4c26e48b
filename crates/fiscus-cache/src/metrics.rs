//! Running counters behind [`CacheMetrics`].

use std::collections::VecDeque;
use std::time::Duration;

use fiscus_core::{CacheEntry, CacheMetrics};

/// Number of `get` latencies kept for the rolling average.
const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
pub struct MetricsRecorder {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    corruptions: u64,
    latencies_ms: VecDeque<f64>,
    snapshot: CacheMetrics,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self, elapsed: Duration) {
        self.hits += 1;
        self.record_latency(elapsed);
    }

    pub fn record_miss(&mut self, elapsed: Duration) {
        self.misses += 1;
        self.record_latency(elapsed);
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_corruption(&mut self) {
        self.corruptions += 1;
    }

    fn record_latency(&mut self, elapsed: Duration) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Rebuilds the derived snapshot from the live entries.
    pub fn recompute<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut snapshot = CacheMetrics {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            corruptions: self.corruptions,
            ..Default::default()
        };

        for entry in entries {
            snapshot.entry_count += 1;
            snapshot.total_bytes += entry.size_bytes;
            if entry.is_compressed {
                snapshot.compressed_entries += 1;
                if let Some(original) = entry.original_size_bytes {
                    snapshot.compression_savings_bytes +=
                        original.saturating_sub(entry.size_bytes);
                }
            }
            snapshot.oldest_entry_at = Some(
                snapshot
                    .oldest_entry_at
                    .map_or(entry.created_at, |t| t.min(entry.created_at)),
            );
            snapshot.newest_entry_at = Some(
                snapshot
                    .newest_entry_at
                    .map_or(entry.created_at, |t| t.max(entry.created_at)),
            );
        }

        if !self.latencies_ms.is_empty() {
            snapshot.average_access_ms =
                self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64;
        }

        self.snapshot = snapshot;
    }

    pub fn snapshot(&self) -> CacheMetrics {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscus_core::Payload;
    use serde_json::json;

    #[test]
    fn test_recompute_aggregates_entries() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_hit(Duration::from_millis(2));
        recorder.record_miss(Duration::from_millis(4));
        recorder.record_evictions(3);

        let plain = CacheEntry::raw("a", json!(1), 100, 10);
        let packed = CacheEntry::new("b", Payload::Compressed(vec![0; 40]), 300, 40)
            .with_original_size(100);

        recorder.recompute([&plain, &packed]);
        let m = recorder.snapshot();

        assert_eq!(m.entry_count, 2);
        assert_eq!(m.total_bytes, 50);
        assert_eq!(m.compressed_entries, 1);
        assert_eq!(m.compression_savings_bytes, 60);
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
        assert_eq!(m.evictions, 3);
        assert_eq!(m.oldest_entry_at, Some(100));
        assert_eq!(m.newest_entry_at, Some(300));
        assert!((m.average_access_ms - 3.0).abs() < 0.01);
    }
}

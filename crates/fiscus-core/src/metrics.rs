//! # Cache Metrics
//!
//! Aggregate view of the entry store, recomputed after every mutating
//! operation and never persisted.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CacheMetrics {
    pub entry_count: u64,
    /// Sum of stored sizes (compressed size for compressed entries).
    pub total_bytes: u64,
    pub compressed_entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Entries dropped because they failed checksum or decoding.
    pub corruptions: u64,
    /// Bytes saved by compression across live entries.
    pub compression_savings_bytes: u64,
    /// Rolling average latency of `get`, in milliseconds.
    pub average_access_ms: f64,
    pub oldest_entry_at: Option<u64>,
    pub newest_entry_at: Option<u64>,
}

impl CacheMetrics {
    /// Hit ratio in `[0, 1]`; zero before the first read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.hits = 3;
        metrics.misses = 1;
        assert!((metrics.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}

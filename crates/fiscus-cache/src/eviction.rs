//! # Eviction Engine
//!
//! Picks the entries to drop when the store is over capacity.
//!
//! ## Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  victims = ceil(20% of entry count), at least 1                        │
//! │                                                                         │
//! │  Primary key: priority (Low → Normal → High)                           │
//! │                                                                         │
//! │  LRU     then last_accessed_at ↑                                       │
//! │  LFU     then access_count     ↑                                       │
//! │  FIFO    then created_at       ↑                                       │
//! │  Random  shuffled within each priority tier                            │
//! │                                                                         │
//! │  Ties: insertion sequence, then key (deterministic)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Selection never fails; an empty store yields no victims.

use fiscus_core::{CacheEntry, EntryPriority, EvictionPolicy};
use rand::seq::SliceRandom;

/// Share of the current entry count evicted per round, in percent.
pub const EVICTION_PERCENT: usize = 20;

/// Number of entries one eviction round removes from a store of `len` entries.
pub fn eviction_count(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (len * EVICTION_PERCENT).div_ceil(100).max(1)
}

/// Lower ranks are evicted first.
fn eviction_rank(priority: EntryPriority) -> u8 {
    match priority {
        EntryPriority::Low => 0,
        EntryPriority::Normal => 1,
        EntryPriority::High => 2,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionEngine {
    policy: EvictionPolicy,
}

impl EvictionEngine {
    pub fn new(policy: EvictionPolicy) -> Self {
        EvictionEngine { policy }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the keys to evict, in eviction order.
    pub fn select_victims<'a, I>(&self, entries: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut candidates: Vec<&CacheEntry> = entries.into_iter().collect();
        let count = eviction_count(candidates.len());
        if count == 0 {
            return Vec::new();
        }

        // Stable base order so every policy breaks ties the same way
        candidates.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.key.cmp(&b.key)));

        // Sorts are stable, so each key only reorders within equal earlier keys
        match self.policy {
            EvictionPolicy::Lru => {
                candidates.sort_by_key(|e| (eviction_rank(e.priority), e.last_accessed_at))
            }
            EvictionPolicy::Lfu => {
                candidates.sort_by_key(|e| (eviction_rank(e.priority), e.access_count))
            }
            EvictionPolicy::Fifo => {
                candidates.sort_by_key(|e| (eviction_rank(e.priority), e.created_at))
            }
            EvictionPolicy::Random => {
                candidates.shuffle(&mut rand::rng());
                candidates.sort_by_key(|e| eviction_rank(e.priority));
            }
        }

        candidates
            .into_iter()
            .take(count)
            .map(|e| e.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn entry(key: &str, seq: u64, created: u64, accessed: u64, count: u64) -> CacheEntry {
        let mut e = CacheEntry::raw(key, json!(key), created, 4);
        e.seq = seq;
        e.last_accessed_at = accessed;
        e.access_count = count;
        e
    }

    #[test]
    fn test_eviction_count() {
        assert_eq!(eviction_count(0), 0);
        assert_eq!(eviction_count(1), 1);
        assert_eq!(eviction_count(3), 1);
        assert_eq!(eviction_count(5), 1);
        assert_eq!(eviction_count(6), 2);
        assert_eq!(eviction_count(10), 2);
        assert_eq!(eviction_count(11), 3);
    }

    #[test]
    fn test_lru_picks_least_recently_accessed() {
        let entries = vec![
            entry("a", 0, 0, 50, 1),
            entry("b", 1, 0, 10, 9),
            entry("c", 2, 0, 30, 1),
        ];
        let victims = EvictionEngine::new(EvictionPolicy::Lru).select_victims(&entries);
        assert_eq!(victims, vec!["b".to_string()]);
    }

    #[test]
    fn test_lfu_picks_least_used() {
        let entries = vec![
            entry("a", 0, 0, 0, 5),
            entry("b", 1, 0, 0, 2),
            entry("c", 2, 0, 0, 7),
        ];
        let victims = EvictionEngine::new(EvictionPolicy::Lfu).select_victims(&entries);
        assert_eq!(victims, vec!["b".to_string()]);
    }

    #[test]
    fn test_fifo_ties_fall_back_to_insertion_order() {
        // Same created_at everywhere: insertion sequence decides
        let entries = vec![
            entry("c", 2, 100, 0, 0),
            entry("a", 0, 100, 0, 0),
            entry("b", 1, 100, 0, 0),
        ];
        let victims = EvictionEngine::new(EvictionPolicy::Fifo).select_victims(&entries);
        assert_eq!(victims, vec!["a".to_string()]);
    }

    #[test]
    fn test_random_sample_size() {
        let entries: Vec<CacheEntry> = (0..10)
            .map(|i| entry(&format!("k{}", i), i, 0, 0, 0))
            .collect();
        let victims = EvictionEngine::new(EvictionPolicy::Random).select_victims(&entries);

        assert_eq!(victims.len(), 2);
        let unique: HashSet<_> = victims.iter().collect();
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_priority_outranks_policy_order() {
        let mut entries = vec![
            entry("old-high", 0, 0, 0, 0),
            entry("mid-normal", 1, 50, 50, 5),
            entry("new-low", 2, 100, 100, 9),
        ];
        entries[0].priority = EntryPriority::High;
        entries[2].priority = EntryPriority::Low;

        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo] {
            let victims = EvictionEngine::new(policy).select_victims(&entries);
            assert_eq!(victims, vec!["new-low".to_string()], "{policy}");
        }
    }

    #[test]
    fn test_random_spares_high_priority() {
        let mut entries: Vec<CacheEntry> = (0..10)
            .map(|i| entry(&format!("k{}", i), i, 0, 0, 0))
            .collect();
        for e in entries.iter_mut().skip(2) {
            e.priority = EntryPriority::High;
        }

        for _ in 0..20 {
            let mut victims = EvictionEngine::new(EvictionPolicy::Random).select_victims(&entries);
            victims.sort();
            assert_eq!(victims, vec!["k0".to_string(), "k1".to_string()]);
        }
    }

    #[test]
    fn test_empty_store_is_noop() {
        let entries: Vec<CacheEntry> = Vec::new();
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Fifo,
            EvictionPolicy::Random,
        ] {
            assert!(EvictionEngine::new(policy).select_victims(&entries).is_empty());
        }
    }
}

//! Bounded key store with expiry scheduling and recency eviction.
//!
//! Maps identity keys to per-key rate limiting state. Expired entries
//! are reclaimed through a min-heap of `(expires_at, key)` entries and
//! the capacity bound is enforced by evicting the least-recently-used
//! key. The map, heap and recency order share a single lifecycle: a
//! slot never exists without a consistent recency position.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::{debug, trace};

use super::recency::{NodeToken, RecencyList};

/// Default maximum number of keys held by a store.
pub const DEFAULT_MAX_STORE_SIZE: usize = 1_000_000;
/// Default call interval for the coarse-horizon cleanup pass.
pub const DEFAULT_CLEANUP_INTERVAL_CALLS: u64 = 1000;
/// Default cap on entries reclaimed by any single sweep.
pub const DEFAULT_MAX_BATCH_CLEANUP: usize = 1000;

/// Tuning knobs for a [`BoundedStore`].
#[derive(Debug, Clone)]
pub struct StoreTuning {
    /// Hard bound on the number of stored keys.
    pub max_keys: usize,
    /// Every Nth call runs an additional coarse-horizon sweep.
    pub cleanup_interval_calls: u64,
    /// Per-sweep cap on reclaimed entries, bounding worst-case call latency.
    pub max_batch_cleanup: usize,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            max_keys: DEFAULT_MAX_STORE_SIZE,
            cleanup_interval_calls: DEFAULT_CLEANUP_INTERVAL_CALLS,
            max_batch_cleanup: DEFAULT_MAX_BATCH_CLEANUP,
        }
    }
}

/// One stored key record: strategy payload plus expiry and recency links.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub(crate) payload: T,
    pub(crate) expires_at_ms: u64,
    recency: NodeToken,
}

/// Heap entry scheduling a key for reclamation.
///
/// Authoritative only while `expires_at_ms` matches the live slot's
/// expiry; anything else is a ghost from a prior cycle and is discarded
/// without side effects when popped.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryEntry {
    expires_at_ms: u64,
    key: String,
}

/// Capacity-bounded mapping from key to per-key state.
#[derive(Debug)]
pub(crate) struct BoundedStore<T> {
    slots: HashMap<String, Slot<T>>,
    expiries: BinaryHeap<Reverse<ExpiryEntry>>,
    recency: RecencyList,
    tuning: StoreTuning,
    calls: u64,
}

impl<T> BoundedStore<T> {
    pub(crate) fn new(tuning: StoreTuning) -> Self {
        Self {
            slots: HashMap::new(),
            expiries: BinaryHeap::new(),
            recency: RecencyList::new(),
            tuning,
            calls: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Per-call housekeeping: an opportunistic batch-capped sweep of
    /// entries expired by `now_ms`, plus (every Nth call) a second
    /// capped sweep against the coarser `now - window` horizon to catch
    /// backlog the opportunistic pass didn't reach.
    pub(crate) fn begin_call(&mut self, now_ms: u64, window_ms: u64) {
        self.calls = self.calls.wrapping_add(1);
        self.sweep_expired(now_ms);
        if self.calls % self.tuning.cleanup_interval_calls == 0 {
            self.sweep_expired(now_ms.saturating_sub(window_ms));
        }
    }

    /// Reclaim entries whose expiry is at or before `horizon_ms`, up to
    /// the batch cap. Returns the number of records removed.
    pub(crate) fn sweep_expired(&mut self, horizon_ms: u64) -> usize {
        let mut removed = 0;
        let mut popped = 0;
        while popped < self.tuning.max_batch_cleanup {
            match self.expiries.peek() {
                Some(Reverse(entry)) if entry.expires_at_ms <= horizon_ms => {}
                _ => break,
            }
            let Reverse(entry) = self.expiries.pop().expect("peeked entry present");
            popped += 1;
            let authoritative = self
                .slots
                .get(&entry.key)
                .is_some_and(|slot| slot.expires_at_ms == entry.expires_at_ms);
            if authoritative {
                let slot = self.slots.remove(&entry.key).expect("slot present");
                self.recency.remove(slot.recency);
                removed += 1;
            } else {
                // Ghost from a refreshed or already-removed record.
                trace!(key = %entry.key, "discarding stale expiry entry");
            }
        }
        removed
    }

    /// Evict least-recently-used keys until the store is under its
    /// capacity bound. Returns the number of evictions.
    pub(crate) fn shrink_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.slots.len() > self.tuning.max_keys {
            if !self.evict_lru() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn evict_lru(&mut self) -> bool {
        let Some(victim) = self.recency.pop_lru() else {
            return false;
        };
        debug!(key = %victim, "evicting least recently used key");
        self.slots.remove(&victim);
        true
    }

    /// Non-promoting read access.
    pub(crate) fn peek(&self, key: &str) -> Option<&Slot<T>> {
        self.slots.get(key)
    }

    /// Non-promoting mutable access to a key's slot.
    pub(crate) fn peek_mut(&mut self, key: &str) -> Option<&mut Slot<T>> {
        self.slots.get_mut(key)
    }

    /// Promote a stored key to most-recently-used.
    pub(crate) fn touch(&mut self, key: &str) {
        if let Some(slot) = self.slots.get(key) {
            self.recency.promote(slot.recency);
        }
    }

    /// Insert or replace a key's record, scheduling its expiry. New keys
    /// evict the recency tail first if the store is at capacity, so the
    /// bound is never exceeded.
    pub(crate) fn insert(&mut self, key: &str, payload: T, expires_at_ms: u64) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.payload = payload;
            slot.expires_at_ms = expires_at_ms;
            let token = slot.recency;
            self.recency.promote(token);
        } else {
            while self.slots.len() >= self.tuning.max_keys {
                if !self.evict_lru() {
                    break;
                }
            }
            let token = self.recency.push_front(key.to_string());
            self.slots.insert(
                key.to_string(),
                Slot {
                    payload,
                    expires_at_ms,
                    recency: token,
                },
            );
        }
        self.expiries.push(Reverse(ExpiryEntry {
            expires_at_ms,
            key: key.to_string(),
        }));
    }

    /// Move a key's expiry forward, leaving the old heap entry behind
    /// as a ghost.
    pub(crate) fn reschedule(&mut self, key: &str, expires_at_ms: u64) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.expires_at_ms = expires_at_ms;
            self.expiries.push(Reverse(ExpiryEntry {
                expires_at_ms,
                key: key.to_string(),
            }));
        }
    }

    /// Remove a key's record entirely.
    pub(crate) fn remove(&mut self, key: &str) -> Option<T> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(slot.recency);
        Some(slot.payload)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.expiries.clear();
        self.recency.clear();
    }

    /// Background reclamation: one capped expired sweep plus capacity
    /// enforcement. Returns the number of records removed.
    pub(crate) fn reclaim(&mut self, now_ms: u64) -> usize {
        self.sweep_expired(now_ms) + self.shrink_to_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn small_store(max_keys: usize) -> BoundedStore<u64> {
        BoundedStore::new(StoreTuning {
            max_keys,
            ..StoreTuning::default()
        })
    }

    #[test]
    fn test_insert_and_peek() {
        let mut store = small_store(10);
        store.insert("a", 1, 1000);

        let slot = store.peek("a").unwrap();
        assert_eq!(slot.payload, 1);
        assert_eq!(slot.expires_at_ms, 1000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_removes_expired_records() {
        let mut store = small_store(10);
        store.insert("a", 1, 100);
        store.insert("b", 1, 200);
        store.insert("c", 1, 300);

        let removed = store.sweep_expired(200);
        assert_eq!(removed, 2);
        assert!(store.peek("a").is_none());
        assert!(store.peek("b").is_none());
        assert!(store.peek("c").is_some());
    }

    #[test]
    fn test_ghost_entries_do_not_remove_refreshed_records() {
        let mut store = small_store(10);
        store.insert("a", 1, 100);
        // Refresh pushes a second heap entry; the first becomes a ghost.
        store.reschedule("a", 500);

        let removed = store.sweep_expired(200);
        assert_eq!(removed, 0);
        assert_eq!(store.peek("a").unwrap().expires_at_ms, 500);

        let removed = store.sweep_expired(500);
        assert_eq!(removed, 1);
        assert!(store.peek("a").is_none());
    }

    #[test]
    fn test_sweep_respects_batch_cap() {
        let mut store: BoundedStore<u64> = BoundedStore::new(StoreTuning {
            max_keys: 100,
            cleanup_interval_calls: 1000,
            max_batch_cleanup: 3,
        });
        for i in 0..10 {
            store.insert(&format!("k{i}"), 1, 50);
        }

        assert_eq!(store.sweep_expired(100), 3);
        assert_eq!(store.len(), 7);
        assert_eq!(store.sweep_expired(100), 3);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_capacity_bound_evicts_least_recently_used() {
        let mut store = small_store(3);
        store.insert("a", 1, 10_000);
        store.insert("b", 1, 10_000);
        store.insert("c", 1, 10_000);

        // Touch "a" so "b" becomes the recency tail.
        store.touch("a");
        store.insert("d", 1, 10_000);

        assert_eq!(store.len(), 3);
        assert!(store.peek("b").is_none());
        assert!(store.peek("a").is_some());
        assert!(store.peek("c").is_some());
        assert!(store.peek("d").is_some());
    }

    #[test]
    fn test_store_never_exceeds_capacity_under_churn() {
        let mut store = small_store(50);
        let mut rng = rand::thread_rng();
        let mut keys: Vec<String> = (0..500).map(|i| format!("key-{i}")).collect();
        keys.shuffle(&mut rng);

        for key in &keys {
            store.insert(key, 1, u64::MAX);
            assert!(store.len() <= 50);
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_eviction_follows_access_order() {
        let mut store = small_store(4);
        for key in ["a", "b", "c", "d"] {
            store.insert(key, 1, u64::MAX);
        }
        // Access pattern: d (insert), then promote b, then a.
        store.touch("b");
        store.touch("a");

        // LRU order is now c < d < b < a.
        store.insert("e", 1, u64::MAX);
        assert!(store.peek("c").is_none());
        store.insert("f", 1, u64::MAX);
        assert!(store.peek("d").is_none());
        assert!(store.peek("a").is_some());
        assert!(store.peek("b").is_some());
    }

    #[test]
    fn test_begin_call_runs_coarse_sweep_every_nth_call() {
        let mut store: BoundedStore<u64> = BoundedStore::new(StoreTuning {
            max_keys: 100,
            cleanup_interval_calls: 5,
            max_batch_cleanup: 2,
        });
        for i in 0..20 {
            store.insert(&format!("k{i}"), 1, 100);
        }

        // Each call's opportunistic pass reclaims at most the batch
        // cap; the backlog drains two records per call.
        for _ in 0..4 {
            store.begin_call(200, 50);
        }
        assert_eq!(store.len(), 12);

        // The fifth call adds the coarse pass (horizon 150 >= 100),
        // which takes another capped batch.
        store.begin_call(200, 50);
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn test_remove_makes_heap_entries_ghosts() {
        let mut store = small_store(10);
        store.insert("a", 7, 100);
        assert_eq!(store.remove("a"), Some(7));
        assert_eq!(store.remove("a"), None);

        // The orphaned heap entry must not panic or remove anything.
        assert_eq!(store.sweep_expired(1000), 0);
    }

    #[test]
    fn test_reclaim_combines_sweep_and_capacity() {
        let mut store = small_store(2);
        store.insert("a", 1, 100);
        store.insert("b", 1, 10_000);

        assert_eq!(store.reclaim(200), 1);
        assert_eq!(store.len(), 1);
        assert!(store.peek("b").is_some());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut store = small_store(10);
        store.insert("a", 1, 100);
        store.insert("b", 1, 200);

        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.sweep_expired(u64::MAX), 0);
    }
}

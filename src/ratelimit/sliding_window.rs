//! Sliding window strategy.

use std::time::Duration;

use super::deadline;
use super::store::{BoundedStore, StoreTuning};
use super::strategy::{KeyState, Strategy};
use crate::error::Result;

/// Exact per-key accounting over a continuously moving interval.
///
/// Each key carries the ordered timestamps of its admitted hits; a hit
/// leaves the window once it is older than `now - window`. No boundary
/// burst is possible, at the cost of O(limit) memory per key.
#[derive(Debug)]
pub struct SlidingWindow {
    window_ms: u64,
    store: BoundedStore<Vec<u64>>,
}

impl SlidingWindow {
    pub fn new(window: Duration, tuning: StoreTuning) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            store: BoundedStore::new(tuning),
        }
    }

    fn cutoff(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.window_ms)
    }
}

impl Strategy for SlidingWindow {
    fn is_allowed(&mut self, key: &str, limit: u64, now_ms: u64) -> Result<bool> {
        self.store.begin_call(now_ms, self.window_ms);
        let cutoff = self.cutoff(now_ms);
        let expires_at_ms = deadline(now_ms, self.window_ms)?;

        let live = match self.store.peek_mut(key) {
            Some(slot) => {
                slot.payload.retain(|&ts| ts >= cutoff);
                if (slot.payload.len() as u64) < limit {
                    slot.payload.push(now_ms);
                    Some(true)
                } else {
                    Some(false)
                }
            }
            None => None,
        };

        match live {
            Some(true) => {
                // The record now outlives its newest hit.
                self.store.reschedule(key, expires_at_ms);
                self.store.touch(key);
                Ok(true)
            }
            Some(false) => {
                self.store.touch(key);
                Ok(false)
            }
            None => {
                self.store.insert(key, vec![now_ms], expires_at_ms);
                Ok(true)
            }
        }
    }

    fn state(&self, key: &str, limit: u64, now_ms: u64) -> KeyState {
        let cutoff = self.cutoff(now_ms);
        match self.store.peek(key) {
            Some(slot) => {
                let live = slot.payload.iter().filter(|&&ts| ts >= cutoff).count() as u64;
                // Timestamps are appended monotonically, so the first
                // live one is the oldest.
                let oldest = slot.payload.iter().copied().find(|&ts| ts >= cutoff);
                KeyState {
                    remaining: limit.saturating_sub(live),
                    reset_at_ms: oldest
                        .map(|ts| ts.saturating_add(self.window_ms))
                        .unwrap_or(now_ms),
                    limit,
                }
            }
            None => KeyState {
                remaining: limit,
                reset_at_ms: now_ms,
                limit,
            },
        }
    }

    fn reset(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    fn reset_all(&mut self) {
        self.store.clear();
    }

    fn active_keys(&self) -> usize {
        self.store.len()
    }

    fn reclaim(&mut self, now_ms: u64) -> usize {
        self.store.reclaim(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(window_ms: u64) -> SlidingWindow {
        SlidingWindow::new(Duration::from_millis(window_ms), StoreTuning::default())
    }

    #[test]
    fn test_limit_is_enforced() {
        let mut sw = strategy(1000);

        for i in 0..3 {
            assert!(sw.is_allowed("k", 3, i).unwrap());
        }
        assert!(!sw.is_allowed("k", 3, 10).unwrap());
    }

    #[test]
    fn test_boundary_burst_is_rejected() {
        let mut sw = strategy(1000);

        // Fill the window at t=0, then probe just before the seam.
        for _ in 0..3 {
            assert!(sw.is_allowed("k", 3, 0).unwrap());
        }
        assert!(!sw.is_allowed("k", 3, 999).unwrap());
    }

    #[test]
    fn test_quota_returns_as_hits_age_out() {
        let mut sw = strategy(1000);

        assert!(sw.is_allowed("k", 2, 0).unwrap());
        assert!(sw.is_allowed("k", 2, 500).unwrap());
        assert!(!sw.is_allowed("k", 2, 900).unwrap());

        // The t=0 hit leaves the window after t=1000.
        assert!(sw.is_allowed("k", 2, 1001).unwrap());
        // Now t=500 and t=1001 occupy the window.
        assert!(!sw.is_allowed("k", 2, 1400).unwrap());
    }

    #[test]
    fn test_no_interval_ever_exceeds_limit() {
        let mut sw = strategy(100);
        let limit = 5;

        // Irregular but monotonic call pattern across several windows.
        let mut admitted: Vec<u64> = Vec::new();
        let mut now = 0u64;
        for step in 0..400u64 {
            now += step % 13 + 1;
            if sw.is_allowed("k", limit, now).unwrap() {
                admitted.push(now);
            }
        }

        // Brute-force check: no 100ms interval holds more than 5 hits.
        for &start in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&ts| ts >= start && ts <= start + 100)
                .count();
            assert!(in_window <= limit as usize, "burst of {in_window} at {start}");
        }
    }

    #[test]
    fn test_state_reports_live_count_and_oldest_reset() {
        let mut sw = strategy(1000);

        sw.is_allowed("k", 3, 100).unwrap();
        sw.is_allowed("k", 3, 400).unwrap();

        let state = sw.state("k", 3, 500);
        assert_eq!(state.remaining, 1);
        assert_eq!(state.reset_at_ms, 1100);

        // After the first hit ages out, only t=400 remains live.
        let state = sw.state("k", 3, 1200);
        assert_eq!(state.remaining, 2);
        assert_eq!(state.reset_at_ms, 1400);
    }

    #[test]
    fn test_state_does_not_mutate() {
        let mut sw = strategy(1000);
        sw.is_allowed("k", 2, 0).unwrap();

        for _ in 0..5 {
            sw.state("k", 2, 10);
        }
        assert!(sw.is_allowed("k", 2, 20).unwrap());
        assert!(!sw.is_allowed("k", 2, 30).unwrap());
    }

    #[test]
    fn test_reset_restores_full_quota() {
        let mut sw = strategy(1000);
        assert!(sw.is_allowed("k", 1, 0).unwrap());
        assert!(!sw.is_allowed("k", 1, 10).unwrap());

        assert!(sw.reset("k"));
        assert!(sw.is_allowed("k", 1, 20).unwrap());
    }

    #[test]
    fn test_reclaim_drops_keys_with_no_live_hits() {
        let mut sw = strategy(1000);
        sw.is_allowed("idle", 5, 0).unwrap();
        sw.is_allowed("busy", 5, 900).unwrap();

        assert_eq!(sw.reclaim(1500), 1);
        assert_eq!(sw.active_keys(), 1);
        assert_eq!(sw.state("busy", 5, 1500).remaining, 4);
    }
}

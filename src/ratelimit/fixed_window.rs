//! Fixed window strategy.

use std::time::Duration;

use super::deadline;
use super::store::{BoundedStore, StoreTuning};
use super::strategy::{KeyState, Strategy};
use crate::error::Result;

/// Counter-per-key limiting over fixed-size windows.
///
/// The window for a key starts the instant the key is first seen in the
/// current cycle and resets when it expires. Simple and fast; a burst
/// spanning a window seam can admit up to twice the limit, which is the
/// documented fixed-window approximation rather than a defect.
#[derive(Debug)]
pub struct FixedWindow {
    window_ms: u64,
    store: BoundedStore<u64>,
}

impl FixedWindow {
    pub fn new(window: Duration, tuning: StoreTuning) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            store: BoundedStore::new(tuning),
        }
    }
}

impl Strategy for FixedWindow {
    fn is_allowed(&mut self, key: &str, limit: u64, now_ms: u64) -> Result<bool> {
        self.store.begin_call(now_ms, self.window_ms);

        let live = match self.store.peek_mut(key) {
            Some(slot) if slot.expires_at_ms > now_ms => {
                if slot.payload < limit {
                    slot.payload += 1;
                    Some(true)
                } else {
                    Some(false)
                }
            }
            _ => None,
        };

        match live {
            Some(allowed) => {
                self.store.touch(key);
                Ok(allowed)
            }
            None => {
                // Absent or expired: start a fresh window.
                let expires_at_ms = deadline(now_ms, self.window_ms)?;
                self.store.insert(key, 1, expires_at_ms);
                Ok(true)
            }
        }
    }

    fn state(&self, key: &str, limit: u64, now_ms: u64) -> KeyState {
        match self.store.peek(key) {
            Some(slot) if slot.expires_at_ms > now_ms => KeyState {
                remaining: limit.saturating_sub(slot.payload),
                reset_at_ms: slot.expires_at_ms,
                limit,
            },
            _ => KeyState {
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

//! Token bucket strategy.

use std::time::Duration;

use super::store::{BoundedStore, StoreTuning};
use super::strategy::{KeyState, Strategy};
use crate::error::Result;

/// Per-key token balance, refilled continuously.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// Smooth burst admission: an idle key can spend up to `limit` tokens
/// at once, then is throttled to the steady refill rate of
/// `limit / window` tokens per millisecond.
///
/// Capacity and refill rate derive from the limit resolved for each
/// call, so per-context (tiered) quotas take effect on a key's next
/// request; the stored balance is clamped to the new capacity.
#[derive(Debug)]
pub struct TokenBucket {
    window_ms: u64,
    store: BoundedStore<Bucket>,
}

impl TokenBucket {
    pub fn new(window: Duration, tuning: StoreTuning) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            store: BoundedStore::new(tuning),
        }
    }

    fn rate_per_ms(&self, limit: u64) -> f64 {
        limit as f64 / self.window_ms as f64
    }

    /// The instant the bucket will be full again; once reached, the
    /// record carries no information and may be reclaimed.
    fn full_at(&self, now_ms: u64, deficit: f64, limit: u64) -> u64 {
        let refill_ms = (deficit / self.rate_per_ms(limit)).ceil();
        if refill_ms.is_finite() && refill_ms >= 0.0 {
            now_ms.saturating_add(refill_ms.min(u64::MAX as f64) as u64)
        } else {
            u64::MAX
        }
    }
}

impl Strategy for TokenBucket {
    fn is_allowed(&mut self, key: &str, limit: u64, now_ms: u64) -> Result<bool> {
        self.store.begin_call(now_ms, self.window_ms);
        let capacity = limit as f64;
        let rate = self.rate_per_ms(limit);

        let refilled = match self.store.peek_mut(key) {
            Some(slot) => {
                let bucket = &mut slot.payload;
                let elapsed = now_ms.saturating_sub(bucket.last_refill_ms) as f64;
                bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
                bucket.last_refill_ms = now_ms;

                let allowed = if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    true
                } else {
                    false
                };
                Some((allowed, capacity - bucket.tokens))
            }
            None => None,
        };

        match refilled {
            Some((allowed, deficit)) => {
                self.store.reschedule(key, self.full_at(now_ms, deficit, limit));
                self.store.touch(key);
                Ok(allowed)
            }
            None => {
                // First sight: a full bucket minus the token just spent.
                let bucket = Bucket {
                    tokens: capacity - 1.0,
                    last_refill_ms: now_ms,
                };
                let expires_at_ms = self.full_at(now_ms, 1.0, limit);
                self.store.insert(key, bucket, expires_at_ms);
                Ok(true)
            }
        }
    }

    fn state(&self, key: &str, limit: u64, now_ms: u64) -> KeyState {
        let capacity = limit as f64;
        let rate = self.rate_per_ms(limit);
        match self.store.peek(key) {
            Some(slot) => {
                let bucket = slot.payload;
                let elapsed = now_ms.saturating_sub(bucket.last_refill_ms) as f64;
                let tokens = (bucket.tokens + elapsed * rate).min(capacity);
                let reset_at_ms = if tokens >= capacity {
                    now_ms
                } else {
                    self.full_at(now_ms, capacity - tokens, limit)
                };
                KeyState {
                    remaining: (tokens.floor() as u64).min(limit),
                    reset_at_ms,
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

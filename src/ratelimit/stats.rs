//! Aggregate and per-key decision counters.

use serde::Serialize;

/// Running totals for one limiter, updated under the store lock so
/// `total_requests == hits + rejections` holds at every read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counters {
    pub(crate) total_requests: u64,
    pub(crate) hits: u64,
    pub(crate) rejections: u64,
}

impl Counters {
    pub(crate) fn record(&mut self, allowed: bool) {
        self.total_requests += 1;
        if allowed {
            self.hits += 1;
        } else {
            self.rejections += 1;
        }
    }
}

/// Per-key decision counts, tracked only when `enable_per_key_stats`
/// is set (an unbounded key space would otherwise grow this map
/// without limit).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub hits: u64,
    pub rejections: u64,
}

impl KeyStats {
    pub(crate) fn record(&mut self, allowed: bool) {
        if allowed {
            self.hits += 1;
        } else {
            self.rejections += 1;
        }
    }
}

/// Aggregate snapshot returned by `Limiter::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Every decision ever made by this limiter.
    pub total_requests: u64,
    /// Decisions that allowed the request.
    pub hits: u64,
    /// Decisions that rejected the request.
    pub rejections: u64,
    /// Keys currently held by the strategy's store.
    pub active_keys: usize,
}

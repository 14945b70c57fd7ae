//! Windowing strategy trait and selection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::fixed_window::FixedWindow;
use super::sliding_window::SlidingWindow;
use super::store::StoreTuning;
use super::token_bucket::TokenBucket;

/// The closed set of windowing algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Per-key counter reset at fixed window boundaries. Fastest, but
    /// admits boundary bursts up to twice the limit across a seam.
    #[default]
    Fixed,
    /// Exact accounting over a continuously moving interval.
    Sliding,
    /// Token balance refilled at a steady rate up to a burst capacity.
    #[serde(alias = "tokenBucket")]
    TokenBucket,
}

/// Read-only projection of a key's current quota status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyState {
    /// Requests still available in the current window.
    pub remaining: u64,
    /// Epoch milliseconds at which quota next becomes available.
    pub reset_at_ms: u64,
    /// The limit the projection was computed against.
    pub limit: u64,
}

/// Capability interface implemented by every windowing strategy.
///
/// Implementations are plain in-memory structures; the owning limiter
/// serializes all access behind its lock, so methods take `&mut self`
/// without any internal synchronization. `now_ms` is always passed in
/// by the caller, which keeps the algorithms deterministic under test.
pub trait Strategy: Send + std::fmt::Debug {
    /// Decide whether `key` may proceed under `limit`, consuming quota
    /// on success.
    fn is_allowed(&mut self, key: &str, limit: u64, now_ms: u64) -> Result<bool>;

    /// Project `key`'s quota status without consuming anything.
    fn state(&self, key: &str, limit: u64, now_ms: u64) -> KeyState;

    /// Forget `key` entirely. Returns whether a record existed.
    fn reset(&mut self, key: &str) -> bool;

    /// Forget every key.
    fn reset_all(&mut self);

    /// Exact count of currently stored keys. Records whose expiry has
    /// passed but which have not yet been reclaimed still count.
    fn active_keys(&self) -> usize;

    /// Reclaim expired records and re-enforce the capacity bound.
    /// Returns the number of records removed.
    fn reclaim(&mut self, now_ms: u64) -> usize;
}

/// Construct the strategy selected by `kind`.
pub(crate) fn build_strategy(
    kind: StrategyKind,
    window: Duration,
    tuning: StoreTuning,
) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Fixed => Box::new(FixedWindow::new(window, tuning)),
        StrategyKind::Sliding => Box::new(SlidingWindow::new(window, tuning)),
        StrategyKind::TokenBucket => Box::new(TokenBucket::new(window, tuning)),
    }
}

//! Rate limiting logic and state management.

mod fixed_window;
mod limiter;
mod reclaimer;
mod recency;
mod sliding_window;
mod stats;
mod store;
mod strategy;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use limiter::Limiter;
pub use sliding_window::SlidingWindow;
pub use stats::{KeyStats, LimiterStats};
pub use store::{
    StoreTuning, DEFAULT_CLEANUP_INTERVAL_CALLS, DEFAULT_MAX_BATCH_CLEANUP, DEFAULT_MAX_STORE_SIZE,
};
pub use strategy::{KeyState, Strategy, StrategyKind};
pub use token_bucket::TokenBucket;

use crate::error::{Result, StanchionError};

/// Wall-clock time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Compute `now + window`, failing fast if the expiry would overflow
/// the millisecond clock representation.
pub(crate) fn deadline(now_ms: u64, window_ms: u64) -> Result<u64> {
    now_ms.checked_add(window_ms).ok_or_else(|| {
        StanchionError::Config("window expiry overflows the clock representation".to_string())
    })
}

//! Core admission engine implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{DecisionHook, Hooks, Limit, LimiterConfig};
use crate::error::{Result, StanchionError};

use super::now_ms;
use super::reclaimer::ReclaimerHandle;
use super::stats::{Counters, KeyStats, LimiterStats};
use super::store::StoreTuning;
use super::strategy::{build_strategy, KeyState, Strategy, StrategyKind};

/// State shared between the request path and the background reclaimer.
///
/// Everything the decision depends on lives behind one lock: the
/// strategy's store, the aggregate counters and the optional per-key
/// counters. Serializing logically-concurrent callers into a strict
/// total order is what makes the check-then-consume sequence correct.
pub(crate) struct Inner {
    pub(crate) strategy: Box<dyn Strategy>,
    pub(crate) counters: Counters,
    pub(crate) per_key: Option<HashMap<String, KeyStats>>,
}

/// The decision engine: one windowing strategy plus configuration,
/// hooks and statistics, exposed through a single `decide` call.
///
/// Multiple limiters (e.g. one per route) have fully independent,
/// non-shared state. The lock is FIFO-fair, so for any two concurrent
/// calls against the same key the outcome reflects arrival order.
pub struct Limiter<C = ()> {
    inner: Arc<Mutex<Inner>>,
    limit: Limit<C>,
    strategy_kind: StrategyKind,
    debug: bool,
    dry_run: bool,
    silent: bool,
    hooks: Hooks<C>,
    reclaim_interval: std::time::Duration,
    reclaimer: parking_lot::Mutex<Option<ReclaimerHandle>>,
}

impl<C> fmt::Debug for Limiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("strategy", &self.strategy_kind)
            .field("limit", &self.limit)
            .field("dry_run", &self.dry_run)
            .field("silent", &self.silent)
            .finish()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StanchionError::InvalidKey(
            "key must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl<C> Limiter<C> {
    /// Create a new limiter from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `StanchionError::Config` aggregating every invalid
    /// field; no partially-usable limiter is ever produced.
    pub fn new(config: LimiterConfig<C>) -> Result<Self> {
        config.validate()?;

        let tuning = StoreTuning {
            max_keys: config.max_store_size,
            cleanup_interval_calls: config.cleanup_interval_calls,
            max_batch_cleanup: config.max_batch_cleanup,
        };
        let strategy = build_strategy(config.strategy, config.window, tuning);

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                strategy,
                counters: Counters::default(),
                per_key: config.enable_per_key_stats.then(HashMap::new),
            })),
            limit: config.limit,
            strategy_kind: config.strategy,
            debug: config.debug,
            dry_run: config.dry_run,
            silent: config.silent,
            hooks: config.hooks,
            reclaim_interval: config.reclaim_interval,
            reclaimer: parking_lot::Mutex::new(None),
        })
    }

    /// Decide whether `key` may proceed.
    ///
    /// Resolves the quota (static or from `ctx`), consults the
    /// strategy and updates statistics, all under the store lock. The
    /// matching `on_pass`/`on_limit_reached` hook runs after the lock
    /// is released; a failing hook is routed to `on_error` and never
    /// disturbs the result.
    ///
    /// In dry-run mode the real decision is still computed (hooks,
    /// stats and debug logging all observe it) but the call always
    /// returns `Ok(true)`. In silent mode the real decision is
    /// returned and not enforcing it is the caller's contract.
    pub async fn decide(&self, key: &str, ctx: &C) -> Result<bool> {
        validate_key(key)?;
        let limit = self.resolve_limit(ctx)?;
        let now = now_ms();

        trace!(key = %key, limit, "checking admission");

        let allowed = {
            let mut inner = self.inner.lock().await;
            let allowed = inner.strategy.is_allowed(key, limit, now)?;
            inner.counters.record(allowed);
            if let Some(per_key) = inner.per_key.as_mut() {
                per_key.entry(key.to_string()).or_default().record(allowed);
            }
            allowed
        };

        if self.debug {
            debug!(
                key = %key,
                limit,
                allowed,
                strategy = ?self.strategy_kind,
                dry_run = self.dry_run,
                "admission decision"
            );
        }

        if allowed {
            self.run_decision_hook(&self.hooks.on_pass, key, ctx);
        } else {
            self.run_decision_hook(&self.hooks.on_limit_reached, key, ctx);
        }

        if self.dry_run {
            return Ok(true);
        }
        Ok(allowed)
    }

    /// Forget `key` entirely: the next call behaves exactly like a
    /// never-seen key. Fires `on_reset`.
    pub async fn reset(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        {
            let mut inner = self.inner.lock().await;
            inner.strategy.reset(key);
            if let Some(per_key) = inner.per_key.as_mut() {
                per_key.remove(key);
            }
        }

        if let Some(hook) = &self.hooks.on_reset {
            if let Err(e) = hook(key) {
                self.report_hook_error(StanchionError::Hook(e.to_string()));
            }
        }
        Ok(())
    }

    /// Forget every key and zero all counters. Bulk teardown; fires no
    /// per-key hooks.
    pub async fn reset_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.strategy.reset_all();
        inner.counters = Counters::default();
        if let Some(per_key) = inner.per_key.as_mut() {
            per_key.clear();
        }
    }

    /// Read-only projection of `key`'s quota status.
    pub async fn state(&self, key: &str, ctx: &C) -> Result<KeyState> {
        validate_key(key)?;
        let limit = self.resolve_limit(ctx)?;
        let inner = self.inner.lock().await;
        Ok(inner.strategy.state(key, limit, now_ms()))
    }

    /// Aggregate counters and the live key count.
    pub async fn stats(&self) -> LimiterStats {
        let inner = self.inner.lock().await;
        LimiterStats {
            total_requests: inner.counters.total_requests,
            hits: inner.counters.hits,
            rejections: inner.counters.rejections,
            active_keys: inner.strategy.active_keys(),
        }
    }

    /// Snapshot of per-key counters; `None` unless
    /// `enable_per_key_stats` was configured.
    pub async fn per_key_stats(&self) -> Option<HashMap<String, KeyStats>> {
        let inner = self.inner.lock().await;
        inner.per_key.clone()
    }

    /// Start the background reclaimer if it is not already running.
    ///
    /// The task acquires the same lock as the request path, so it
    /// never runs concurrently with a decision on this store. Must be
    /// called from within a tokio runtime.
    pub fn start_reclaimer(&self) {
        let mut guard = self.reclaimer.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(ReclaimerHandle::spawn(
            Arc::clone(&self.inner),
            self.reclaim_interval,
        ));
    }

    /// Stop the background reclaimer and wait for it to exit.
    pub async fn stop_reclaimer(&self) {
        let handle = self.reclaimer.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    fn resolve_limit(&self, ctx: &C) -> Result<u64> {
        let limit = self.limit.resolve(ctx);
        if limit == 0 {
            return Err(StanchionError::Config(
                "resolved limit must be greater than zero".to_string(),
            ));
        }
        Ok(limit)
    }

    fn run_decision_hook(&self, hook: &Option<DecisionHook<C>>, key: &str, ctx: &C) {
        if let Some(hook) = hook {
            if let Err(e) = hook(key, ctx) {
                self.report_hook_error(StanchionError::Hook(e.to_string()));
            }
        }
    }

    fn report_hook_error(&self, err: StanchionError) {
        warn!(error = %err, "hook failed");
        if let Some(on_error) = &self.hooks.on_error {
            on_error(&err);
        }
    }
}

impl<C> Drop for Limiter<C> {
    fn drop(&mut self) {
        // An abandoned reclaimer must not outlive its store.
        if let Some(handle) = self.reclaimer.lock().take() {
            handle.abort();
        }
    }
}

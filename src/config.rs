//! Configuration for Stanchion limiters.
//!
//! [`LimiterConfig`] is the full programmatic surface (quota source,
//! hooks, modes); [`LimiterSettings`] is the serializable subset that
//! can be loaded from a YAML string or file and converted into a
//! config.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StanchionError};
use crate::ratelimit::{
    StrategyKind, DEFAULT_CLEANUP_INTERVAL_CALLS, DEFAULT_MAX_BATCH_CLEANUP,
    DEFAULT_MAX_STORE_SIZE,
};

/// Default quota when none is configured.
pub const DEFAULT_LIMIT: u64 = 1000;
/// Default window when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
/// Default background reclaim interval.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on the window, keeping expiry arithmetic within the
/// millisecond clock representation.
const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Error type user-supplied hooks may fail with.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Hook invoked with the decided key and the caller's context.
pub type DecisionHook<C> =
    Arc<dyn Fn(&str, &C) -> std::result::Result<(), HookError> + Send + Sync>;
/// Hook invoked when a key is explicitly reset.
pub type ResetHook = Arc<dyn Fn(&str) -> std::result::Result<(), HookError> + Send + Sync>;
/// Sink for contained errors (failed hooks). Infallible by design.
pub type ErrorHook = Arc<dyn Fn(&StanchionError) + Send + Sync>;

/// User-supplied callbacks. A failing hook is reported to `on_error`
/// and never disturbs the admission decision.
pub struct Hooks<C> {
    pub on_pass: Option<DecisionHook<C>>,
    pub on_limit_reached: Option<DecisionHook<C>>,
    pub on_reset: Option<ResetHook>,
    pub on_error: Option<ErrorHook>,
}

impl<C> Default for Hooks<C> {
    fn default() -> Self {
        Self {
            on_pass: None,
            on_limit_reached: None,
            on_reset: None,
            on_error: None,
        }
    }
}

impl<C> Clone for Hooks<C> {
    fn clone(&self) -> Self {
        Self {
            on_pass: self.on_pass.clone(),
            on_limit_reached: self.on_limit_reached.clone(),
            on_reset: self.on_reset.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<C> fmt::Debug for Hooks<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_pass", &self.on_pass.is_some())
            .field("on_limit_reached", &self.on_limit_reached.is_some())
            .field("on_reset", &self.on_reset.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// The quota source: a static number, or a function of the request
/// context for adaptive/tiered limits.
pub enum Limit<C> {
    Fixed(u64),
    PerContext(Arc<dyn Fn(&C) -> u64 + Send + Sync>),
}

impl<C> Limit<C> {
    pub(crate) fn resolve(&self, ctx: &C) -> u64 {
        match self {
            Limit::Fixed(limit) => *limit,
            Limit::PerContext(f) => f(ctx),
        }
    }
}

impl<C> Clone for Limit<C> {
    fn clone(&self) -> Self {
        match self {
            Limit::Fixed(limit) => Limit::Fixed(*limit),
            Limit::PerContext(f) => Limit::PerContext(f.clone()),
        }
    }
}

impl<C> fmt::Debug for Limit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Fixed(limit) => f.debug_tuple("Fixed").field(limit).finish(),
            Limit::PerContext(_) => f.write_str("PerContext(..)"),
        }
    }
}

/// Full configuration for a [`crate::ratelimit::Limiter`].
#[derive(Debug, Clone)]
pub struct LimiterConfig<C = ()> {
    /// Quota per key per window.
    pub limit: Limit<C>,
    /// The time span a quota is counted over.
    pub window: Duration,
    /// Windowing algorithm.
    pub strategy: StrategyKind,
    /// Hard bound on keys stored by the strategy.
    pub max_store_size: usize,
    /// Every Nth call runs the coarse-horizon cleanup pass.
    pub cleanup_interval_calls: u64,
    /// Per-sweep cap on reclaimed entries.
    pub max_batch_cleanup: usize,
    /// Background reclaimer period.
    pub reclaim_interval: Duration,
    /// Track per-key hit/rejection counts.
    pub enable_per_key_stats: bool,
    /// Emit a `tracing` event for every decision.
    pub debug: bool,
    /// Compute real decisions (hooks, stats) but always report "allowed".
    pub dry_run: bool,
    /// Report real decisions; the caller agrees not to enforce them.
    pub silent: bool,
    /// User callbacks.
    pub hooks: Hooks<C>,
}

impl<C> Default for LimiterConfig<C> {
    fn default() -> Self {
        Self {
            limit: Limit::Fixed(DEFAULT_LIMIT),
            window: DEFAULT_WINDOW,
            strategy: StrategyKind::default(),
            max_store_size: DEFAULT_MAX_STORE_SIZE,
            cleanup_interval_calls: DEFAULT_CLEANUP_INTERVAL_CALLS,
            max_batch_cleanup: DEFAULT_MAX_BATCH_CLEANUP,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            enable_per_key_stats: false,
            debug: false,
            dry_run: false,
            silent: false,
            hooks: Hooks::default(),
        }
    }
}

impl<C> LimiterConfig<C> {
    /// Configuration with a static quota; everything else defaulted.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit: Limit::Fixed(limit),
            window,
            ..Self::default()
        }
    }

    /// Configuration with a per-context quota function.
    pub fn with_limit_fn<F>(limit: F, window: Duration) -> Self
    where
        F: Fn(&C) -> u64 + Send + Sync + 'static,
    {
        Self {
            limit: Limit::PerContext(Arc::new(limit)),
            window,
            ..Self::default()
        }
    }

    /// Validate the configuration, aggregating every problem into a
    /// single descriptive failure.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Limit::Fixed(0) = self.limit {
            problems.push("limit must be greater than zero".to_string());
        }
        if self.window.is_zero() {
            problems.push("window must be greater than zero".to_string());
        } else if self.window > MAX_WINDOW {
            problems.push(format!(
                "window must not exceed {} seconds",
                MAX_WINDOW.as_secs()
            ));
        }
        if self.max_store_size == 0 {
            problems.push("max_store_size must be greater than zero".to_string());
        }
        if self.cleanup_interval_calls == 0 {
            problems.push("cleanup_interval_calls must be greater than zero".to_string());
        }
        if self.max_batch_cleanup == 0 {
            problems.push("max_batch_cleanup must be greater than zero".to_string());
        }
        if self.reclaim_interval.is_zero() {
            problems.push("reclaim_interval must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StanchionError::Config(problems.join("; ")))
        }
    }
}

/// The serializable subset of [`LimiterConfig`]: static quota only,
/// no hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Quota per key per window.
    pub limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Windowing algorithm.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Hard bound on stored keys.
    #[serde(default = "default_max_store_size")]
    pub max_store_size: usize,

    /// Coarse cleanup cadence in calls.
    #[serde(default = "default_cleanup_interval_calls")]
    pub cleanup_interval_calls: u64,

    /// Per-sweep reclamation cap.
    #[serde(default = "default_max_batch_cleanup")]
    pub max_batch_cleanup: usize,

    /// Background reclaim interval in seconds.
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,

    #[serde(default)]
    pub enable_per_key_stats: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub silent: bool,
}

fn default_max_store_size() -> usize {
    DEFAULT_MAX_STORE_SIZE
}

fn default_cleanup_interval_calls() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_CALLS
}

fn default_max_batch_cleanup() -> usize {
    DEFAULT_MAX_BATCH_CLEANUP
}

fn default_reclaim_interval_secs() -> u64 {
    DEFAULT_RECLAIM_INTERVAL.as_secs()
}

impl LimiterSettings {
    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| StanchionError::Config(format!("failed to parse limiter settings: {e}")))
    }

    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Convert into a full configuration (no hooks attached).
    pub fn into_config<C>(self) -> LimiterConfig<C> {
        LimiterConfig {
            limit: Limit::Fixed(self.limit),
            window: Duration::from_secs(self.window_secs),
            strategy: self.strategy,
            max_store_size: self.max_store_size,
            cleanup_interval_calls: self.cleanup_interval_calls,
            max_batch_cleanup: self.max_batch_cleanup,
            reclaim_interval: Duration::from_secs(self.reclaim_interval_secs),
            enable_per_key_stats: self.enable_per_key_stats,
            debug: self.debug,
            dry_run: self.dry_run,
            silent: self.silent,
            hooks: Hooks::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LimiterConfig::<()>::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_store_size, 1_000_000);
        assert_eq!(config.cleanup_interval_calls, 1000);
        assert_eq!(config.max_batch_cleanup, 1000);
        assert_eq!(config.strategy, StrategyKind::Fixed);
        assert!(!config.dry_run);
        assert!(!config.silent);
    }

    #[test]
    fn test_validation_aggregates_every_problem() {
        let config = LimiterConfig::<()> {
            limit: Limit::Fixed(0),
            window: Duration::ZERO,
            max_store_size: 0,
            ..LimiterConfig::default()
        };

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("limit"));
        assert!(message.contains("window"));
        assert!(message.contains("max_store_size"));
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let config = LimiterConfig::<()>::new(10, Duration::from_secs(u64::MAX / 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_context_limit_resolves_from_context() {
        let config = LimiterConfig::<u64>::with_limit_fn(|tier| tier * 10, Duration::from_secs(1));
        assert_eq!(config.limit.resolve(&3), 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_parse_with_defaults() {
        let yaml = r#"
limit: 100
window_secs: 60
"#;
        let settings = LimiterSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.limit, 100);
        assert_eq!(settings.window_secs, 60);
        assert_eq!(settings.strategy, StrategyKind::Fixed);
        assert_eq!(settings.max_store_size, 1_000_000);
        assert_eq!(settings.reclaim_interval_secs, 30);
        assert!(!settings.enable_per_key_stats);
    }

    #[test]
    fn test_settings_parse_full_document() {
        let yaml = r#"
limit: 50
window_secs: 10
strategy: tokenBucket
max_store_size: 500
cleanup_interval_calls: 100
max_batch_cleanup: 10
reclaim_interval_secs: 5
enable_per_key_stats: true
dry_run: true
"#;
        let settings = LimiterSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.strategy, StrategyKind::TokenBucket);
        assert_eq!(settings.max_store_size, 500);
        assert!(settings.enable_per_key_stats);
        assert!(settings.dry_run);

        let config: LimiterConfig = settings.into_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.window, Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_settings_are_rejected() {
        let err = LimiterSettings::from_yaml("limit: [nope]").unwrap_err();
        assert!(matches!(err, StanchionError::Config(_)));
    }

    #[test]
    fn test_hooks_debug_reports_presence_only() {
        let hooks: Hooks<()> = Hooks {
            on_pass: Some(Arc::new(|_, _| Ok(()))),
            ..Hooks::default()
        };
        let rendered = format!("{hooks:?}");
        assert!(rendered.contains("on_pass: true"));
        assert!(rendered.contains("on_reset: false"));
    }
}

//! Error types for the Stanchion engine.

use thiserror::Error;

/// Main error type for Stanchion operations.
#[derive(Error, Debug)]
pub enum StanchionError {
    /// Configuration rejected before the limiter became usable, or an
    /// invalid quota resolved at call time. Construction-time problems
    /// are aggregated into a single message.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller supplied an unusable identity key. The call that
    /// triggered this mutated no state.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A user-supplied hook failed. Delivered to the `on_error` hook
    /// only; never propagated to the caller of `decide`.
    #[error("hook error: {0}")]
    Hook(String),

    /// I/O errors (settings file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Stanchion operations.
pub type Result<T> = std::result::Result<T, StanchionError>;

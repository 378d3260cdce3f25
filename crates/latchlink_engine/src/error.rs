//! Error types for the engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur outside the tick loop.
///
/// Device failures inside a tick are not errors at this level: they feed
/// the retry policy and end up as published results.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or payload JSON is malformed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested operation does not apply in the current state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

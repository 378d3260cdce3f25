//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding inbound payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid JSON for the expected shape.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("expected a JSON object")]
    NotAnObject,
}

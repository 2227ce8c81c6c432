//! Message service error types.

use thiserror::Error;

/// Message service error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Canonical store error.
    #[error("Store error: {0}")]
    Store(#[from] message_store::Error),

    /// Anyhow error (for compatibility with nats_client).
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for message service operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Session store error types.

use thiserror::Error;

/// Session store error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;

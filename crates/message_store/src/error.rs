//! Message store error types.

use thiserror::Error;

/// Message store error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Postgres error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A row expected to exist was not found.
    #[error("Missing record for dedup key {0}")]
    Missing(String),
}

/// Result type for message store operations.
pub type Result<T> = std::result::Result<T, Error>;

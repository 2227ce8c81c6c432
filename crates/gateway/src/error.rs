//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Anyhow error (for compatibility with nats_client).
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Session directory / roster error.
    #[error("Session store error: {0}")]
    Session(#[from] session_store::Error),

    /// Bad or expired credential.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Malformed submission; the connection stays open.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Ingestion log unreachable or slow; the caller should retry.
    #[error("Ingestion log unavailable: {0}")]
    IngestUnavailable(String),

    /// Connection not found.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,
}

impl GatewayError {
    /// Wire error code reported back to the submitting client.
    pub fn wire_code(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "AUTH_ERROR",
            GatewayError::InvalidInput(_) => "INVALID_INPUT",
            GatewayError::IngestUnavailable(_) => "RETRY_LATER",
            _ => "PROCESSING_ERROR",
        }
    }
}

impl From<tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(
            GatewayError::InvalidInput("empty".into()).wire_code(),
            "INVALID_INPUT"
        );
        assert_eq!(
            GatewayError::IngestUnavailable("timeout".into()).wire_code(),
            "RETRY_LATER"
        );
        assert_eq!(GatewayError::ChannelSend.wire_code(), "PROCESSING_ERROR");
    }
}

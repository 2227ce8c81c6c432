//! WebSocket protocol message types.
//!
//! Defines the JSON message format for client-server communication.

use common::MessageEvent;
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a chat message to a room or recipient key.
    Send {
        /// Message body (must be non-empty).
        body: String,
        /// Room or recipient key.
        target: String,
    },
    /// Join a room for delivery filtering.
    Join {
        /// Room or recipient key.
        target: String,
    },
    /// Leave a room.
    Leave {
        /// Room or recipient key.
        target: String,
    },
    /// Ping message for keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Canonical chat message delivered through the fan-out path.
    Message(MessageEvent),
    /// Recent backlog for a room (sent on join).
    History {
        /// Room or recipient key.
        target: String,
        /// Messages ascending by canonical id.
        messages: Vec<MessageEvent>,
    },
    /// Submission accepted into the ingestion log.
    ///
    /// This acknowledges the durable enqueue, not persistence; the canonical
    /// message arrives through the normal delivery path.
    Accepted {
        /// Room or recipient key the submission addressed.
        target: String,
    },
    /// Confirmation of a room join.
    Joined {
        /// Room or recipient key.
        target: String,
    },
    /// Confirmation of a room leave.
    Left {
        /// Room or recipient key.
        target: String,
    },
    /// Pong response to ping.
    Pong,
    /// Error message.
    Error {
        /// Error message.
        message: String,
        /// Error code.
        code: String,
    },
}

/// Backlog response from the message service HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct BacklogResponse {
    pub messages: Vec<MessageEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send","body":"hi","target":"room1"}"#).unwrap();
        match msg {
            ClientMessage::Send { body, target } => {
                assert_eq!(body, "hi");
                assert_eq!(target, "room1");
            }
            _ => panic!("expected send"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_tags() {
        let frame = ServerMessage::Message(MessageEvent {
            id: 1,
            sender_id: "A".to_string(),
            body: "hi".to_string(),
            target: "room1".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(json.contains(r#""id":1"#));
        assert!(json.contains(r#""sender_id":"A""#));

        let err = ServerMessage::Error {
            message: "ingestion log unavailable".to_string(),
            code: "RETRY_LATER".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""code":"RETRY_LATER""#));
    }
}

//! Event schema shared by the gateway, the ingestion log, and the writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw submission as appended to the ingestion log by a gateway.
///
/// Transient: consumed once by the persistence writer and then discarded from
/// the log. `sender_id` is always the authenticated user of the submitting
/// connection, never a client-supplied value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    /// Authenticated sender user id.
    pub sender_id: String,
    /// Message body (validated non-empty by the gateway).
    pub body: String,
    /// Room or recipient key the message is addressed to.
    pub target: String,
    /// Gateway-side submission timestamp. Feeds the dedup key only; the
    /// canonical `created_at` is assigned by the store.
    pub submitted_at: DateTime<Utc>,
}

impl RawEvent {
    /// Deterministic deduplication key for idempotent commits.
    ///
    /// Derived from sender, target, and submission instant, so a redelivered
    /// copy of the same RawEvent always maps to the same key while two
    /// distinct submissions never collide in practice.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.target.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.submitted_at.timestamp_micros().to_be_bytes());
        let digest = hasher.finalize();
        let mut key = String::with_capacity(32);
        for byte in &digest[..16] {
            key.push_str(&format!("{:02x}", byte));
        }
        key
    }
}

/// Canonical message record.
///
/// Created exclusively by the persistence writer after a durable commit; this
/// is both the fan-out bus payload and the client wire form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEvent {
    /// Strictly increasing canonical id.
    pub id: i64,
    /// Authenticated sender user id.
    pub sender_id: String,
    /// Message body.
    pub body: String,
    /// Room or recipient key.
    pub target: String,
    /// Server-assigned commit timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_raw(sender: &str, target: &str, micros: i64) -> RawEvent {
        RawEvent {
            sender_id: sender.to_string(),
            body: "hi".to_string(),
            target: target.to_string(),
            submitted_at: Utc.timestamp_micros(micros).unwrap(),
        }
    }

    #[test]
    fn test_dedup_key_deterministic() {
        let a = make_raw("alice", "room1", 1_700_000_000_000_000);
        let b = make_raw("alice", "room1", 1_700_000_000_000_000);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key().len(), 32);
    }

    #[test]
    fn test_dedup_key_sensitive_to_fields() {
        let base = make_raw("alice", "room1", 1_700_000_000_000_000);
        assert_ne!(
            base.dedup_key(),
            make_raw("bob", "room1", 1_700_000_000_000_000).dedup_key()
        );
        assert_ne!(
            base.dedup_key(),
            make_raw("alice", "room2", 1_700_000_000_000_000).dedup_key()
        );
        assert_ne!(
            base.dedup_key(),
            make_raw("alice", "room1", 1_700_000_000_000_001).dedup_key()
        );
    }

    #[test]
    fn test_message_event_wire_form() {
        let event = MessageEvent {
            id: 1,
            sender_id: "alice".to_string(),
            body: "hi".to_string(),
            target: "room1".to_string(),
            created_at: Utc.timestamp_micros(1_700_000_000_000_000).unwrap(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"sender_id\":\"alice\""));
    }
}

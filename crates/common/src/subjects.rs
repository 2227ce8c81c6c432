//! Subject layout for the ingestion log and the fan-out bus.
//!
//! One conversation maps to exactly one subject on each side, so ordering by
//! partition key falls out of NATS subject ordering.

use sha2::{Digest, Sha256};

/// Ingestion log subject prefix. Stream `CHAT_INGEST` captures `ingest.chat.>`.
pub const INGEST_PREFIX: &str = "ingest.chat";

/// Fan-out bus subject prefix. Gateways subscribe to `chat.events.>`.
pub const FANOUT_PREFIX: &str = "chat.events";

/// Maximum target length passed through verbatim before hashing kicks in.
const MAX_VERBATIM_LEN: usize = 64;

/// Map a room-or-recipient key to a subject-safe partition token.
///
/// Keys made of subject-safe characters pass through unchanged so subjects
/// stay readable; anything else is hashed (SHA-256, 16 hex chars) to the same
/// token on every gateway.
pub fn room_token(target: &str) -> String {
    let safe = !target.is_empty()
        && target.len() <= MAX_VERBATIM_LEN
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        return target.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    let mut token = String::with_capacity(16);
    for byte in &digest[..8] {
        token.push_str(&format!("{:02x}", byte));
    }
    token
}

/// Ingestion log subject for a target.
pub fn ingest_subject(target: &str) -> String {
    format!("{}.{}", INGEST_PREFIX, room_token(target))
}

/// Fan-out bus subject for a target.
pub fn fanout_subject(target: &str) -> String {
    format!("{}.{}", FANOUT_PREFIX, room_token(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_targets_pass_through() {
        assert_eq!(room_token("room1"), "room1");
        assert_eq!(room_token("dm_alice_bob"), "dm_alice_bob");
        assert_eq!(room_token("a-b-c"), "a-b-c");
    }

    #[test]
    fn test_unsafe_targets_are_hashed() {
        let token = room_token("general chat #1");
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic across gateways.
        assert_eq!(token, room_token("general chat #1"));
        // Dots would break subject hierarchy.
        assert_ne!(room_token("a.b"), "a.b");
    }

    #[test]
    fn test_empty_and_oversized_targets_are_hashed() {
        assert_eq!(room_token("").len(), 16);
        let long = "x".repeat(65);
        assert_eq!(room_token(&long).len(), 16);
    }

    #[test]
    fn test_subject_layout() {
        assert_eq!(ingest_subject("room1"), "ingest.chat.room1");
        assert_eq!(fanout_subject("room1"), "chat.events.room1");
        // Same conversation, same subject, regardless of which gateway built it.
        assert_eq!(ingest_subject("room 1"), ingest_subject("room 1"));
    }
}

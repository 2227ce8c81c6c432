//! Session directory operations.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Redis key prefix for sessions: session:{user_id}
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Redis key prefix for online flags: online:{user_id}
pub const ONLINE_KEY_PREFIX: &str = "online:";

/// A session directory entry: which gateway currently serves a user.
///
/// At most one entry per user is authoritative at a time; a reconnect from
/// any gateway overwrites it (last-writer-wins).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntry {
    /// Gateway instance holding the live connection.
    pub gateway_id: String,
    /// Opaque connection handle on that gateway.
    pub connection_id: String,
    /// When this entry lapses unless refreshed.
    pub expires_at: DateTime<Utc>,
}

impl SessionEntry {
    /// True if `gateway_id`/`connection_id` identify the same live connection.
    pub fn owned_by(&self, gateway_id: &str, connection_id: &str) -> bool {
        self.gateway_id == gateway_id && self.connection_id == connection_id
    }
}

/// Outcome of a session refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// TTL re-asserted; this connection still owns the session.
    Refreshed,
    /// Another connection overwrote the entry; the caller should close.
    Superseded,
}

/// Redis client wrapper for the session directory.
#[derive(Clone)]
pub struct SessionStore {
    client: Arc<redis::Client>,
    ttl_secs: u64,
}

impl SessionStore {
    /// Create a new session store.
    pub fn new(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            ttl_secs,
        })
    }

    /// Session entry TTL in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    fn entry(&self, gateway_id: &str, connection_id: &str) -> SessionEntry {
        SessionEntry {
            gateway_id: gateway_id.to_string(),
            connection_id: connection_id.to_string(),
            expires_at: Utc::now() + Duration::seconds(self.ttl_secs as i64),
        }
    }

    /// Register a session for a user, overwriting any previous entry.
    pub async fn register(
        &self,
        user_id: &str,
        gateway_id: &str,
        connection_id: &str,
    ) -> Result<SessionEntry> {
        let mut conn = self.get_connection().await?;
        let entry = self.entry(gateway_id, connection_id);
        let json = serde_json::to_string(&entry)?;

        conn.set_ex::<_, _, ()>(session_key(user_id), &json, self.ttl_secs)
            .await?;
        conn.set_ex::<_, _, ()>(online_key(user_id), "true", self.ttl_secs)
            .await?;
        info!("Registered session for {} on {}", user_id, gateway_id);

        Ok(entry)
    }

    /// Re-assert the TTL if this connection still owns the session.
    ///
    /// A missing entry (TTL lapsed, e.g. after a Redis hiccup) is re-created:
    /// the connection is demonstrably alive. A mismatching entry means a newer
    /// connection took over; the caller must not write and should close.
    pub async fn refresh(
        &self,
        user_id: &str,
        gateway_id: &str,
        connection_id: &str,
    ) -> Result<RefreshOutcome> {
        let mut conn = self.get_connection().await?;
        let current: Option<String> = conn.get(session_key(user_id)).await?;

        if let Some(json) = current {
            let existing: SessionEntry = serde_json::from_str(&json)?;
            if !existing.owned_by(gateway_id, connection_id) {
                debug!(
                    "Session for {} superseded by {} ({})",
                    user_id, existing.gateway_id, existing.connection_id
                );
                return Ok(RefreshOutcome::Superseded);
            }
        }

        let entry = self.entry(gateway_id, connection_id);
        let json = serde_json::to_string(&entry)?;
        conn.set_ex::<_, _, ()>(session_key(user_id), &json, self.ttl_secs)
            .await?;
        conn.set_ex::<_, _, ()>(online_key(user_id), "true", self.ttl_secs)
            .await?;

        Ok(RefreshOutcome::Refreshed)
    }

    /// Delete the session if this connection still owns it. Idempotent; a
    /// superseded entry is left for its new owner.
    pub async fn clear(
        &self,
        user_id: &str,
        gateway_id: &str,
        connection_id: &str,
    ) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let current: Option<String> = conn.get(session_key(user_id)).await?;

        if let Some(json) = current {
            let existing: SessionEntry = serde_json::from_str(&json)?;
            if existing.owned_by(gateway_id, connection_id) {
                conn.del::<_, ()>(session_key(user_id)).await?;
                conn.del::<_, ()>(online_key(user_id)).await?;
                info!("Cleared session for {}", user_id);
            }
        }

        Ok(())
    }

    /// Look up the session entry for a user.
    pub async fn lookup(&self, user_id: &str) -> Result<Option<SessionEntry>> {
        let mut conn = self.get_connection().await?;
        let json: Option<String> = conn.get(session_key(user_id)).await?;

        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// Check whether a user currently has a live session.
    pub async fn is_online(&self, user_id: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.exists(online_key(user_id)).await?;
        Ok(exists)
    }
}

fn session_key(user_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, user_id)
}

fn online_key(user_id: &str) -> String {
    format!("{}{}", ONLINE_KEY_PREFIX, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(session_key("alice"), "session:alice");
        assert_eq!(online_key("alice"), "online:alice");
    }

    #[test]
    fn test_entry_ownership() {
        let entry = SessionEntry {
            gateway_id: "gw-1".to_string(),
            connection_id: "c-1".to_string(),
            expires_at: Utc::now(),
        };
        assert!(entry.owned_by("gw-1", "c-1"));
        assert!(!entry.owned_by("gw-2", "c-1"));
        assert!(!entry.owned_by("gw-1", "c-2"));
    }
}

//! Room roster: user-level membership shared across gateway instances.

use crate::error::Result;
use common::room_token;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::debug;

/// Redis key prefix for rosters: room:{token}:members
pub const ROOM_KEY_PREFIX: &str = "room:";

/// Redis-backed room roster.
///
/// Membership is keyed by user, not connection, and survives disconnects;
/// an explicit leave removes it.
#[derive(Clone)]
pub struct RoomRoster {
    client: Arc<redis::Client>,
}

impl RoomRoster {
    /// Create a new roster client.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Add a user to a room.
    pub async fn join(&self, target: &str, user_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.sadd::<_, _, ()>(room_key(target), user_id).await?;
        debug!("User {} joined room {}", user_id, target);
        Ok(())
    }

    /// Remove a user from a room.
    pub async fn leave(&self, target: &str, user_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.srem::<_, _, ()>(room_key(target), user_id).await?;
        debug!("User {} left room {}", user_id, target);
        Ok(())
    }

    /// Check whether a user is a participant of a room.
    pub async fn is_member(&self, target: &str, user_id: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let member: bool = conn.sismember(room_key(target), user_id).await?;
        Ok(member)
    }

    /// List the members of a room.
    pub async fn members(&self, target: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.smembers(room_key(target)).await?;
        Ok(members)
    }
}

fn room_key(target: &str) -> String {
    format!("{}{}:members", ROOM_KEY_PREFIX, room_token(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_key_format() {
        assert_eq!(room_key("room1"), "room:room1:members");
    }

    #[test]
    fn test_room_key_uses_partition_token() {
        // A target with subject-unsafe characters maps through the same
        // token the ingest/fan-out subjects use.
        let key = room_key("general chat #1");
        assert!(key.starts_with(ROOM_KEY_PREFIX));
        assert!(key.ends_with(":members"));
        assert_eq!(key, room_key("general chat #1"));
        assert!(!key.contains(' '));
    }
}

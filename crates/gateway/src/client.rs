//! Connection state and registry management.
//!
//! Uses lock-free DashMap for concurrent access from connection tasks and the
//! delivery router. The registry is owned exclusively by this gateway
//! instance; cross-instance state goes through the session directory only.

use crate::error::{GatewayError, Result};
use crate::protocol::ServerMessage;
use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique connection identifier (the opaque handle published to the session
/// directory).
pub type ConnectionId = Uuid;

/// Buffer size for per-connection outbound channels. A full buffer means a
/// slow client; messages are dropped rather than blocking the router.
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// State for a single authenticated connection.
pub struct ConnectionState {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Authenticated user this connection belongs to.
    pub user_id: String,
    /// Channel to the connection's WebSocket writer task.
    pub tx: mpsc::Sender<Message>,
    /// Rooms this connection joined (local cache of the roster membership).
    pub rooms: DashSet<String>,
    /// Timestamp when the connection was accepted.
    pub connected_at: i64,
}

impl ConnectionState {
    /// Create state for a newly authenticated connection.
    pub fn new(user_id: impl Into<String>, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
            rooms: DashSet::new(),
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Send a frame to this connection. Non-blocking; a full buffer fails.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.tx
            .try_send(Message::Text(json.into()))
            .map_err(|_| GatewayError::ChannelSend)
    }

    /// Try to send a raw frame. Returns false if the buffer is full or the
    /// connection is gone (slow client, message dropped).
    pub fn try_send_raw(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Check whether this connection joined a room.
    pub fn joined(&self, target: &str) -> bool {
        self.rooms.contains(target)
    }
}

/// Lock-free registry of this gateway's live connections.
///
/// Maintains:
/// - Connection id → connection state
/// - Room key → connection ids (delivery filter index)
/// - User id → connection ids (a user may hold several connections)
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionState>>,
    rooms: DashMap<String, DashSet<ConnectionId>>,
    users: DashMap<String, DashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Register a new connection.
    pub fn register(&self, connection: Arc<ConnectionState>) -> ConnectionId {
        let id = connection.id;
        self.users
            .entry(connection.user_id.clone())
            .or_default()
            .insert(id);
        self.connections.insert(id, connection);
        id
    }

    /// Unregister a connection and clean up all indexes. Idempotent.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            for room in connection.rooms.iter() {
                if let Some(ids) = self.rooms.get(&*room) {
                    ids.remove(connection_id);
                }
            }
            if let Some(ids) = self.users.get(&connection.user_id) {
                ids.remove(connection_id);
            }
        }
    }

    /// Get a connection by id.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ConnectionState>> {
        self.connections.get(connection_id).map(|r| r.clone())
    }

    /// Record a room join for a connection.
    pub fn join(&self, connection_id: &ConnectionId, target: &str) -> Result<()> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(connection_id.to_string()))?;

        connection.rooms.insert(target.to_string());
        self.rooms
            .entry(target.to_string())
            .or_default()
            .insert(*connection_id);
        Ok(())
    }

    /// Record a room leave for a connection.
    pub fn leave(&self, connection_id: &ConnectionId, target: &str) -> Result<()> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(connection_id.to_string()))?;

        connection.rooms.remove(target);
        if let Some(ids) = self.rooms.get(target) {
            ids.remove(connection_id);
        }
        Ok(())
    }

    /// All local connections joined to a room.
    pub fn local_members(&self, target: &str) -> Vec<Arc<ConnectionState>> {
        if let Some(ids) = self.rooms.get(target) {
            ids.iter()
                .filter_map(|id| self.connections.get(&*id).map(|c| c.clone()))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// All local connections held by a user.
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Arc<ConnectionState>> {
        if let Some(ids) = self.users.get(user_id) {
            ids.iter()
                .filter_map(|id| self.connections.get(&*id).map(|c| c.clone()))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of rooms tracked by the local index.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(user: &str) -> Arc<ConnectionState> {
        let (tx, _rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        Arc::new(ConnectionState::new(user, tx))
    }

    #[test]
    fn test_join_and_local_members() {
        let registry = ConnectionRegistry::new();
        let a = make_connection("alice");
        let b = make_connection("bob");
        registry.register(a.clone());
        registry.register(b.clone());

        registry.join(&a.id, "room1").unwrap();
        registry.join(&b.id, "room1").unwrap();
        registry.join(&b.id, "room2").unwrap();

        let members = registry.local_members("room1");
        assert_eq!(members.len(), 2);
        assert_eq!(registry.local_members("room2").len(), 1);
        assert!(registry.local_members("room3").is_empty());
    }

    #[test]
    fn test_same_user_multiple_connections() {
        // A sender's own other connections receive the room's messages too.
        let registry = ConnectionRegistry::new();
        let first = make_connection("alice");
        let second = make_connection("alice");
        registry.register(first.clone());
        registry.register(second.clone());

        registry.join(&first.id, "room1").unwrap();
        registry.join(&second.id, "room1").unwrap();

        assert_eq!(registry.local_members("room1").len(), 2);
        assert_eq!(registry.connections_for_user("alice").len(), 2);
    }

    #[test]
    fn test_unregister_cleans_indexes() {
        let registry = ConnectionRegistry::new();
        let a = make_connection("alice");
        registry.register(a.clone());
        registry.join(&a.id, "room1").unwrap();

        registry.unregister(&a.id);
        assert!(registry.local_members("room1").is_empty());
        assert!(registry.connections_for_user("alice").is_empty());
        assert_eq!(registry.connection_count(), 0);

        // Idempotent.
        registry.unregister(&a.id);
    }

    #[test]
    fn test_leave_removes_from_filter() {
        let registry = ConnectionRegistry::new();
        let a = make_connection("alice");
        registry.register(a.clone());
        registry.join(&a.id, "room1").unwrap();
        assert!(a.joined("room1"));

        registry.leave(&a.id, "room1").unwrap();
        assert!(!a.joined("room1"));
        assert!(registry.local_members("room1").is_empty());
    }

    #[test]
    fn test_join_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.join(&id, "room1").is_err());
    }
}

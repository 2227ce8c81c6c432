//! Postgres-backed message store.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use common::{room_token, MessageEvent, RawEvent};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

const INIT_SQL: &str = include_str!("../migrations/001_init.sql");

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// First commit of this RawEvent.
    Inserted(MessageEvent),
    /// The same RawEvent was already committed (redelivery absorbed).
    Duplicate(MessageEvent),
}

impl InsertOutcome {
    /// The committed canonical message, regardless of outcome.
    pub fn message(&self) -> &MessageEvent {
        match self {
            InsertOutcome::Inserted(msg) | InsertOutcome::Duplicate(msg) => msg,
        }
    }
}

/// Canonical message store.
pub struct MessageStore {
    client: Client,
    _connection_task: JoinHandle<()>,
}

impl MessageStore {
    /// Connect to Postgres and run the embedded migration.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Postgres connection error: {}", e);
            }
        });

        client.batch_execute(INIT_SQL).await?;
        info!("Message store ready");

        Ok(Self {
            client,
            _connection_task: connection_task,
        })
    }

    /// Commit a RawEvent, assigning canonical identity.
    ///
    /// Idempotent under redelivery: the dedup key carries a UNIQUE constraint
    /// and a conflicting insert loads the already-committed row instead.
    /// `created_at` is assigned by the database, never taken from the client.
    pub async fn insert(&self, raw: &RawEvent) -> Result<InsertOutcome> {
        let dedup_key = raw.dedup_key();
        let token = room_token(&raw.target);

        let inserted = self
            .client
            .query_opt(
                "INSERT INTO messages (dedup_key, sender_id, body, target, room_token, submitted_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (dedup_key) DO NOTHING
                 RETURNING id, created_at",
                &[
                    &dedup_key,
                    &raw.sender_id,
                    &raw.body,
                    &raw.target,
                    &token,
                    &raw.submitted_at,
                ],
            )
            .await?;

        if let Some(row) = inserted {
            let id: i64 = row.get(0);
            let created_at: DateTime<Utc> = row.get(1);
            return Ok(InsertOutcome::Inserted(MessageEvent {
                id,
                sender_id: raw.sender_id.clone(),
                body: raw.body.clone(),
                target: raw.target.clone(),
                created_at,
            }));
        }

        let existing = self
            .client
            .query_opt(
                "SELECT id, sender_id, body, target, created_at
                 FROM messages WHERE dedup_key = $1",
                &[&dedup_key],
            )
            .await?
            .ok_or(Error::Missing(dedup_key))?;

        Ok(InsertOutcome::Duplicate(row_to_event(&existing)))
    }

    /// The most recent messages of a room, ascending by canonical id.
    pub async fn recent_messages(&self, token: &str, limit: i64) -> Result<Vec<MessageEvent>> {
        let limit = limit.clamp(1, 500);
        let rows = self
            .client
            .query(
                "SELECT id, sender_id, body, target, created_at
                 FROM messages WHERE room_token = $1
                 ORDER BY id DESC LIMIT $2",
                &[&token, &limit],
            )
            .await?;

        let mut messages: Vec<MessageEvent> = rows.iter().map(row_to_event).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Total number of committed messages (health/metrics).
    pub async fn message_count(&self) -> Result<i64> {
        let row = self
            .client
            .query_one("SELECT count(*) FROM messages", &[])
            .await?;
        Ok(row.get(0))
    }
}

fn row_to_event(row: &Row) -> MessageEvent {
    MessageEvent {
        id: row.get(0),
        sender_id: row.get(1),
        body: row.get(2),
        target: row.get(3),
        created_at: row.get(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_migration_declares_dedup_constraint() {
        // The idempotence property hangs off this constraint.
        assert!(INIT_SQL.contains("dedup_key TEXT NOT NULL UNIQUE"));
        assert!(INIT_SQL.contains("BIGSERIAL"));
        assert!(INIT_SQL.contains("DEFAULT now()"));
    }

    #[test]
    fn test_outcome_exposes_message() {
        let msg = MessageEvent {
            id: 7,
            sender_id: "alice".to_string(),
            body: "hi".to_string(),
            target: "room1".to_string(),
            created_at: Utc.timestamp_micros(1_700_000_000_000_000).unwrap(),
        };
        assert_eq!(InsertOutcome::Inserted(msg.clone()).message().id, 7);
        assert_eq!(InsertOutcome::Duplicate(msg).message().id, 7);
    }
}

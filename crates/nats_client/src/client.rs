//! NATS client implementation with JetStream support.
//!
//! The ingestion log is a JetStream work queue: an append is durable once the
//! broker acks it, and a record is discarded only after the consuming writer
//! acks it. The fan-out bus is plain NATS Core publish/subscribe with no
//! persistence.

use anyhow::Result;
use async_nats::jetstream::{self, consumer, stream::Stream};
use async_nats::{Client, Subscriber};
use common::INGEST_PREFIX;
use std::time::Duration;
use tracing::info;

/// Durable consumer name of the persistence writer group.
pub const WRITER_CONSUMER_NAME: &str = "message-writer";

/// Default max messages held in the ingest stream.
pub const DEFAULT_MAX_MESSAGES: i64 = 1_000_000;

/// Default max bytes held in the ingest stream (1GB).
pub const DEFAULT_MAX_BYTES: i64 = 1_073_741_824;

/// Default redelivery window for unacked records.
pub const DEFAULT_ACK_WAIT_SECS: u64 = 30;

/// Configuration for the ingestion log stream.
#[derive(Debug, Clone)]
pub struct IngestStreamConfig {
    /// Stream name.
    pub name: String,
    /// Subject patterns to capture.
    pub subjects: Vec<String>,
    /// Maximum number of messages.
    pub max_messages: i64,
    /// Maximum bytes.
    pub max_bytes: i64,
    /// Redelivery window for records the writer has not acked.
    pub ack_wait_secs: u64,
}

impl Default for IngestStreamConfig {
    fn default() -> Self {
        Self {
            name: "CHAT_INGEST".to_string(),
            subjects: vec![format!("{}.>", INGEST_PREFIX)],
            max_messages: DEFAULT_MAX_MESSAGES,
            max_bytes: DEFAULT_MAX_BYTES,
            ack_wait_secs: DEFAULT_ACK_WAIT_SECS,
        }
    }
}

/// Wrapper around the NATS client with JetStream context.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connect to a NATS server and create a JetStream context.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        let jetstream = jetstream::new(client.clone());

        Ok(Self { client, jetstream })
    }

    /// Create or get the ingestion log stream.
    ///
    /// Work-queue retention: a record lives until the writer group acks it.
    pub async fn ensure_ingest_stream(&self, config: &IngestStreamConfig) -> Result<Stream> {
        info!(
            "Ensuring stream '{}' exists (subjects: {:?})",
            config.name, config.subjects
        );

        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.name.clone(),
                subjects: config.subjects.clone(),
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_messages: config.max_messages,
                max_bytes: config.max_bytes,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await?;

        info!("Stream '{}' ready", config.name);
        Ok(stream)
    }

    /// Create or get the writer group's durable pull consumer.
    ///
    /// Explicit ack, `max_ack_pending = 1`: a single in-flight record, so a
    /// redelivery can never be reordered behind newer records of the same
    /// conversation.
    pub async fn writer_consumer(
        &self,
        stream: &Stream,
        config: &IngestStreamConfig,
    ) -> Result<consumer::PullConsumer> {
        let consumer = stream
            .get_or_create_consumer(
                WRITER_CONSUMER_NAME,
                consumer::pull::Config {
                    durable_name: Some(WRITER_CONSUMER_NAME.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(config.ack_wait_secs),
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await?;

        info!("Durable consumer '{}' ready", WRITER_CONSUMER_NAME);
        Ok(consumer)
    }

    /// Append a record to the ingestion log (durable once this returns Ok).
    pub async fn append(&self, subject: impl Into<String>, payload: bytes::Bytes) -> Result<()> {
        self.jetstream
            .publish(subject.into(), payload)
            .await?
            .await?;
        Ok(())
    }

    /// Publish on the fan-out bus (NATS Core, fire-and-forget).
    pub async fn publish_fanout(&self, subject: &str, payload: bytes::Bytes) -> Result<()> {
        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    /// Subscribe to a subject pattern on the fan-out bus.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        info!("Subscribing to subject pattern: {}", subject);
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(subscriber)
    }

    /// Get the underlying JetStream context.
    pub fn context(&self) -> &jetstream::Context {
        &self.jetstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_config() {
        let config = IngestStreamConfig::default();
        assert_eq!(config.name, "CHAT_INGEST");
        assert_eq!(config.subjects, vec!["ingest.chat.>".to_string()]);
        assert!(config.ack_wait_secs > 0);
    }
}

//! Persistence writer: ingestion log → canonical store → fan-out bus.
//!
//! Records are processed strictly one at a time. Per record:
//! decode, commit (idempotent), publish, then ack. The ack is the offset
//! advance; anything un-acked redelivers after the stream's ack wait, and the
//! dedup key absorbs the resulting duplicate commit.

use crate::error::Result;
use common::{fanout_subject, RawEvent};
use futures::StreamExt;
use message_store::{InsertOutcome, MessageStore};
use metrics::counter;
use nats_client::{IngestStreamConfig, NatsClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for the persistence writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Ingestion log stream settings.
    pub stream: IngestStreamConfig,
    /// Attempts per record before the failure is fatal.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub initial_retry_delay: Duration,
    /// Cap on the retry delay.
    pub max_retry_delay: Duration,
    /// Bound on total processing time per record. Must stay below the
    /// stream's ack wait or a slow commit races its own redelivery.
    pub processing_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            stream: IngestStreamConfig::default(),
            max_attempts: 5,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(20),
        }
    }
}

/// Outcome of handling one consumed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    /// Committed and published; safe to ack.
    Done,
    /// Undecodable; logged for manual recovery and acked so the stream
    /// cannot wedge on it.
    Poison,
    /// Retries exhausted or timed out; NOT acked, will redeliver.
    Fatal,
}

/// Next exponential backoff delay.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// The ingestion log consumer that owns canonical message identity.
pub struct MessageWriter {
    store: Arc<MessageStore>,
    nats: Arc<NatsClient>,
    config: WriterConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl MessageWriter {
    /// Create a new writer.
    pub fn new(
        store: Arc<MessageStore>,
        nats: Arc<NatsClient>,
        config: WriterConfig,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            store,
            nats,
            config,
            shutdown_rx,
        }
    }

    /// Run the writer (blocking).
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting MessageWriter on stream '{}'",
            self.config.stream.name
        );

        let stream = self.nats.ensure_ingest_stream(&self.config.stream).await?;
        let consumer = self.nats.writer_consumer(&stream, &self.config.stream).await?;
        let mut messages = consumer.messages().await.map_err(anyhow::Error::from)?;

        info!("MessageWriter running");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("MessageWriter received shutdown signal");
                    break;
                }

                msg = messages.next() => {
                    match msg {
                        Some(Ok(record)) => {
                            counter!("writer_records_received_total").increment(1);

                            let outcome = self.handle_record(&record.payload).await;
                            match outcome {
                                RecordOutcome::Done | RecordOutcome::Poison => {
                                    if let Err(e) = record.ack().await {
                                        // Redelivery after ack wait; the dedup
                                        // key absorbs the duplicate commit.
                                        warn!("Ack failed: {:?}", e);
                                    }
                                }
                                RecordOutcome::Fatal => {
                                    counter!("writer_fatal_records_total").increment(1);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Consumer error: {:?}", e);
                            counter!(
                                "writer_errors_total",
                                "error_type" => "consumer"
                            ).increment(1);
                        }
                        None => {
                            warn!("Consumer stream ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("MessageWriter stopped");
        Ok(())
    }

    /// Process a single consumed record through the per-record state machine.
    async fn handle_record(&self, payload: &[u8]) -> RecordOutcome {
        let raw: RawEvent = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    "Undecodable record dropped ({}): {}",
                    e,
                    String::from_utf8_lossy(payload)
                );
                counter!("writer_poison_records_total").increment(1);
                return RecordOutcome::Poison;
            }
        };

        match tokio::time::timeout(
            self.config.processing_timeout,
            self.commit_and_publish(&raw),
        )
        .await
        {
            Ok(Ok(())) => RecordOutcome::Done,
            Ok(Err(e)) => {
                error!(
                    "Record failed after {} attempts, left for redelivery: {:?} record={:?}",
                    self.config.max_attempts, e, raw
                );
                RecordOutcome::Fatal
            }
            Err(_) => {
                error!(
                    "Record processing timed out after {:?}, left for redelivery: record={:?}",
                    self.config.processing_timeout, raw
                );
                RecordOutcome::Fatal
            }
        }
    }

    /// Commit and publish with bounded retries.
    async fn commit_and_publish(&self, raw: &RawEvent) -> Result<()> {
        let mut delay = self.config.initial_retry_delay;
        let mut attempt = 1;

        loop {
            match self.try_once(raw).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.config.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}: {:?}",
                        attempt, self.config.max_attempts, delay, e
                    );
                    counter!(
                        "writer_errors_total",
                        "error_type" => "retry"
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay, self.config.max_retry_delay);
                    attempt += 1;
                }
            }
        }
    }

    /// One commit-and-publish attempt.
    ///
    /// Publishing also happens for duplicate commits: a crash between commit
    /// and publish must still publish on redelivery. The duplicate publish is
    /// tolerated downstream.
    async fn try_once(&self, raw: &RawEvent) -> Result<()> {
        let outcome = self.store.insert(raw).await?;

        match &outcome {
            InsertOutcome::Inserted(event) => {
                counter!("writer_records_committed_total").increment(1);
                debug!("Committed message {} for {}", event.id, event.target);
            }
            InsertOutcome::Duplicate(event) => {
                counter!("writer_duplicates_absorbed_total").increment(1);
                debug!(
                    "Redelivery of message {} for {} absorbed",
                    event.id, event.target
                );
            }
        }

        let event = outcome.message();
        let payload = serde_json::to_vec(event)?;
        self.nats
            .publish_fanout(&fanout_subject(&event.target), payload.into())
            .await?;

        counter!("writer_events_published_total").increment(1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_bounds() {
        let config = WriterConfig::default();
        assert!(config.max_attempts > 1);
        // A record must resolve (or go fatal) before its redelivery fires.
        assert!(config.processing_timeout < Duration::from_secs(config.stream.ack_wait_secs));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(5);
        let mut delay = Duration::from_millis(500);

        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_secs(1));
        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_secs(2));
        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_secs(4));
        delay = next_backoff(delay, max);
        assert_eq!(delay, max);
        assert_eq!(next_backoff(delay, max), max);
    }
}

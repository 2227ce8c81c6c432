//! NATS client for the chat relay: JetStream ingestion log + Core fan-out bus.

mod client;

pub use client::{IngestStreamConfig, NatsClient, WRITER_CONSUMER_NAME};

//! Message service library.
//!
//! The sole consumer group of the ingestion log. Assigns canonical identity
//! to every chat message, commits it durably, publishes it on the fan-out
//! bus, and serves the history HTTP API over the canonical store.

pub mod api;
pub mod error;
pub mod writer;

pub use api::{create_router, AppState};
pub use error::{Error, Result};
pub use writer::{MessageWriter, WriterConfig};

//! Common types and utilities shared by the chat relay services.

pub mod events;
pub mod subjects;

pub use events::{MessageEvent, RawEvent};
pub use subjects::{fanout_subject, ingest_subject, room_token, FANOUT_PREFIX, INGEST_PREFIX};

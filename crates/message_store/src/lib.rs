//! Durable canonical message store backed by Postgres.
//!
//! The persistence writer is the only component that inserts here; gateways
//! and the history API only read. Canonical identity (strictly increasing id,
//! server-side timestamp) is assigned by the insert.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{InsertOutcome, MessageStore};

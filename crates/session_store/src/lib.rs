//! Redis-backed session directory and room roster.
//!
//! The session directory maps a user id to the gateway instance currently
//! serving them, with a TTL so entries from a dead gateway self-expire.
//! The roster records user-level room membership shared across gateways.

pub mod error;
pub mod rooms;
pub mod sessions;

pub use error::{Error, Result};
pub use rooms::RoomRoster;
pub use sessions::{RefreshOutcome, SessionEntry, SessionStore};

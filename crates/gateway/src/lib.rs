//! Connection gateway library.
//!
//! One gateway process owns a set of live, authenticated WebSocket
//! connections. Inbound submissions are appended to the ingestion log without
//! waiting for persistence; canonical messages come back through the fan-out
//! bus and are routed to the matching local connections only.

pub mod auth;
pub mod client;
pub mod error;
pub mod protocol;
pub mod router;
pub mod ws_server;

pub use auth::TokenVerifier;
pub use client::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use error::{GatewayError, Result};
pub use protocol::{ClientMessage, ServerMessage};
pub use router::{DeliveryRouter, RouterConfig};
pub use ws_server::{create_router, AppState};

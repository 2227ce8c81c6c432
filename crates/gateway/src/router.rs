//! Delivery router: fan-out bus → WebSocket delivery.
//!
//! Subscribes to canonical chat events and pushes each one to the local
//! connections joined to its target. Events with no matching local
//! connection are discarded after the filter check; that is the expected
//! case on most gateways.

use crate::client::{ConnectionRegistry, ConnectionState};
use crate::error::Result;
use crate::protocol::{BacklogResponse, ServerMessage};
use common::{room_token, MessageEvent, FANOUT_PREFIX};
use futures::StreamExt;
use metrics::counter;
use nats_client::NatsClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the delivery router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Fan-out bus subject pattern to subscribe to.
    pub fanout_subject: String,
    /// Base URL for the message service HTTP API.
    pub message_service_url: String,
    /// Number of backlog messages fetched on join.
    pub backlog_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fanout_subject: format!("{}.>", FANOUT_PREFIX),
            message_service_url: "http://localhost:8081".to_string(),
            backlog_limit: 50,
        }
    }
}

/// Deliver a canonical event payload to the matching local connections.
/// Returns the number of connections the event was pushed to.
pub fn dispatch_event(registry: &ConnectionRegistry, payload: &[u8]) -> Result<usize> {
    let event: MessageEvent = serde_json::from_slice(payload)?;

    let connections = registry.local_members(&event.target);
    if connections.is_empty() {
        // No matching local connection; expected on most instances.
        debug!("No local connections joined to {}", event.target);
        return Ok(0);
    }

    debug!(
        "Routing message {} for {} to {} connections",
        event.id,
        event.target,
        connections.len()
    );

    // Pre-serialize once for all recipients.
    let frame = ServerMessage::Message(event);
    let json = serde_json::to_string(&frame)?;

    let mut delivered = 0;
    for connection in connections {
        if connection.try_send_raw(axum::extract::ws::Message::Text(json.clone().into())) {
            delivered += 1;
        } else {
            debug!("Dropped event for slow connection {}", connection.id);
            counter!("gateway_events_dropped_total").increment(1);
        }
    }

    Ok(delivered)
}

/// Routes canonical chat events from the fan-out bus to WebSocket clients.
pub struct DeliveryRouter {
    /// Connection registry for the delivery filter.
    registry: Arc<ConnectionRegistry>,
    /// NATS client for the fan-out subscription.
    nats: Arc<NatsClient>,
    /// HTTP client for backlog fetches.
    http_client: reqwest::Client,
    /// Configuration.
    config: RouterConfig,
}

impl DeliveryRouter {
    /// Create a new delivery router.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        nats: Arc<NatsClient>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            nats,
            http_client: reqwest::Client::new(),
            config,
        }
    }

    /// Run the router (blocking).
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(
            "Starting DeliveryRouter, subscribing to '{}'",
            self.config.fanout_subject
        );

        let mut subscriber = self.nats.subscribe(&self.config.fanout_subject).await?;

        info!("DeliveryRouter running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("DeliveryRouter received shutdown signal");
                    break;
                }

                msg = subscriber.next() => {
                    match msg {
                        Some(nats_msg) => {
                            counter!("gateway_events_received_total").increment(1);
                            match dispatch_event(&self.registry, &nats_msg.payload) {
                                Ok(delivered) if delivered > 0 => {
                                    counter!("gateway_events_routed_total").increment(1);
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("Failed to handle event: {:?}", e);
                                    counter!("gateway_routing_errors_total").increment(1);
                                }
                            }
                        }
                        None => {
                            warn!("Fan-out subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("DeliveryRouter stopped");
        Ok(())
    }

    /// Fetch and send the recent backlog of a room to a connection.
    /// Sent on join so a client renders history before live traffic.
    pub async fn send_backlog(
        &self,
        connection: &Arc<ConnectionState>,
        target: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/rooms/{}/messages?limit={}",
            self.config.message_service_url,
            room_token(target),
            self.config.backlog_limit
        );

        debug!("Fetching backlog from: {}", url);

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            warn!(
                "Failed to fetch backlog for {}: {}",
                target,
                response.status()
            );
            return Ok(()); // Don't error, just skip the backlog
        }

        let backlog: BacklogResponse = response.json().await?;

        connection.send(&ServerMessage::History {
            target: target.to_string(),
            messages: backlog.messages,
        })?;

        counter!("gateway_backlogs_sent_total").increment(1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CONNECTION_CHANNEL_BUFFER;
    use chrono::{TimeZone, Utc};

    fn make_payload(target: &str) -> Vec<u8> {
        serde_json::to_vec(&MessageEvent {
            id: 1,
            sender_id: "A".to_string(),
            body: "hi".to_string(),
            target: target.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn test_default_config_covers_full_stream() {
        let config = RouterConfig::default();
        assert_eq!(config.fanout_subject, "chat.events.>");
        assert!(config.backlog_limit > 0);
    }

    #[test]
    fn test_dispatch_filters_by_room() {
        let registry = ConnectionRegistry::new();

        let (tx, mut rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let member = Arc::new(ConnectionState::new("alice", tx));
        registry.register(member.clone());
        registry.join(&member.id, "room1").unwrap();

        let (other_tx, mut other_rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let outsider = Arc::new(ConnectionState::new("bob", other_tx));
        registry.register(outsider.clone());

        let delivered = dispatch_event(&registry, &make_payload("room1")).unwrap();
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_reaches_senders_other_connections() {
        let registry = ConnectionRegistry::new();

        let (tx_a, mut rx_a) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let (tx_b, mut rx_b) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let first = Arc::new(ConnectionState::new("alice", tx_a));
        let second = Arc::new(ConnectionState::new("alice", tx_b));
        registry.register(first.clone());
        registry.register(second.clone());
        registry.join(&first.id, "room1").unwrap();
        registry.join(&second.id, "room1").unwrap();

        let delivered = dispatch_event(&registry, &make_payload("room1")).unwrap();
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_dispatch_with_no_members_is_a_discard() {
        let registry = ConnectionRegistry::new();
        let delivered = dispatch_event(&registry, &make_payload("room1")).unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_dispatch_rejects_malformed_payload() {
        let registry = ConnectionRegistry::new();
        assert!(dispatch_event(&registry, b"not json").is_err());
    }
}

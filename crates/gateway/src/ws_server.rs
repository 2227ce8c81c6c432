//! WebSocket server handler using Axum.
//!
//! Credential verification happens before the upgrade; everything after it
//! runs as one task per connection.

use crate::auth::{extract_token, TokenVerifier};
use crate::client::{ConnectionRegistry, ConnectionState, CONNECTION_CHANNEL_BUFFER};
use crate::error::{GatewayError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::router::DeliveryRouter;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use common::{ingest_subject, RawEvent};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use nats_client::NatsClient;
use serde::Deserialize;
use session_store::{RefreshOutcome, RoomRoster, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<DeliveryRouter>,
    pub sessions: SessionStore,
    pub roster: RoomRoster,
    pub nats: Arc<NatsClient>,
    pub verifier: TokenVerifier,
    /// This gateway instance's id, as published to the session directory.
    pub gateway_id: String,
    /// Bound on how long a submit may wait for the ingestion log.
    pub submit_timeout: Duration,
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.registry.connection_count();
    let rooms = state.registry.room_count();
    format!(
        r#"{{"status":"ok","connections":{},"rooms":{}}}"#,
        connections, rooms
    )
}

/// WebSocket upgrade handler. The credential is verified here, before the
/// upgrade; a bad or expired token refuses the connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let token = match extract_token(query.token.as_deref(), &headers) {
        Some(token) => token,
        None => {
            counter!("gateway_auth_failures_total").increment(1);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let user_id = match state.verifier.verify(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("Rejected connection: {}", e);
            counter!("gateway_auth_failures_total").increment(1);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

/// Handle an authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded channel so a slow client drops messages instead of growing.
    let (tx, mut rx) = mpsc::channel::<Message>(CONNECTION_CHANNEL_BUFFER);

    let connection = Arc::new(ConnectionState::new(user_id.clone(), tx));
    let connection_id = state.registry.register(connection.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!("User {} connected ({})", user_id, connection_id);

    // Forward frames from the channel to the WebSocket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Publish presence. Last-writer-wins: this overwrites any session the
    // user had on another gateway; that connection closes on its next refresh.
    if let Err(e) = state
        .sessions
        .register(&user_id, &state.gateway_id, &connection_id.to_string())
        .await
    {
        warn!("Session registration failed for {}: {:?}", user_id, e);
        let _ = connection.send(&ServerMessage::Error {
            message: "session directory unavailable".to_string(),
            code: "RETRY_LATER".to_string(),
        });
        state.registry.unregister(&connection_id);
        // Dropping the last sender lets the forward task flush the error
        // frame and exit on its own.
        drop(connection);
        let _ = send_task.await;
        gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);
        return;
    }

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Refresh strictly inside the TTL so only a dead process loses the session.
    let refresh_secs = (state.sessions.ttl_secs() / 3).max(1);
    let mut refresh_interval = interval(Duration::from_secs(refresh_secs));
    refresh_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    refresh_interval.reset(); // Don't fire immediately

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&state, &connection, msg).await {
                            warn!("Error handling message from {}: {:?}", connection_id, e);
                            let _ = connection.send(&ServerMessage::Error {
                                message: e.to_string(),
                                code: e.wire_code().to_string(),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", connection_id, e);
                        break;
                    }
                    None => {
                        // Connection closed
                        break;
                    }
                }
            }

            _ = refresh_interval.tick() => {
                match state
                    .sessions
                    .refresh(&connection.user_id, &state.gateway_id, &connection_id.to_string())
                    .await
                {
                    Ok(RefreshOutcome::Refreshed) => {}
                    Ok(RefreshOutcome::Superseded) => {
                        info!(
                            "Session for {} taken over elsewhere, closing {}",
                            connection.user_id, connection_id
                        );
                        counter!("gateway_sessions_superseded_total").increment(1);
                        break;
                    }
                    Err(e) => {
                        // Transient directory failure; the TTL still covers us
                        // until the next tick.
                        warn!("Session refresh failed for {}: {:?}", connection.user_id, e);
                    }
                }
            }

            _ = ping_interval.tick() => {
                if !connection.try_send_raw(Message::Ping(vec![].into()))
                    && connection.tx.is_closed()
                {
                    break;
                }
            }
        }
    }

    // Cleanup. Session delete is owner-checked, so a superseded entry stays.
    state.registry.unregister(&connection_id);
    if let Err(e) = state
        .sessions
        .clear(&connection.user_id, &state.gateway_id, &connection_id.to_string())
        .await
    {
        warn!("Session clear failed for {}: {:?}", connection.user_id, e);
    }
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!("User {} disconnected ({})", connection.user_id, connection_id);
}

/// Handle a single WebSocket message.
async fn handle_message(
    state: &Arc<AppState>,
    connection: &Arc<ConnectionState>,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(&text)
                .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
            handle_client_message(state, connection, client_msg).await
        }
        Message::Binary(data) => {
            let client_msg: ClientMessage = serde_json::from_slice(&data)
                .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
            handle_client_message(state, connection, client_msg).await
        }
        Message::Ping(data) => {
            connection
                .tx
                .try_send(Message::Pong(data))
                .map_err(|_| GatewayError::ChannelSend)?;
            Ok(())
        }
        Message::Pong(_) => Ok(()),
        Message::Close(_) => {
            // Will be handled by the connection loop
            Ok(())
        }
    }
}

/// Handle a parsed client message.
async fn handle_client_message(
    state: &Arc<AppState>,
    connection: &Arc<ConnectionState>,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::Send { body, target } => {
            submit(state, connection, body, target).await
        }
        ClientMessage::Join { target } => {
            if target.is_empty() {
                return Err(GatewayError::InvalidInput("empty target".to_string()));
            }
            debug!("User {} joining {}", connection.user_id, target);

            // Roster first: the local filter set is a cache of accepted
            // membership, never ahead of it.
            state.roster.join(&target, &connection.user_id).await?;
            state.registry.join(&connection.id, &target)?;

            connection.send(&ServerMessage::Joined {
                target: target.clone(),
            })?;

            if let Err(e) = state.router.send_backlog(connection, &target).await {
                warn!(
                    "Failed to send backlog for {} to {}: {:?}",
                    target, connection.id, e
                );
            }

            counter!("gateway_joins_total").increment(1);
            Ok(())
        }
        ClientMessage::Leave { target } => {
            debug!("User {} leaving {}", connection.user_id, target);

            state.roster.leave(&target, &connection.user_id).await?;
            state.registry.leave(&connection.id, &target)?;

            connection.send(&ServerMessage::Left { target })?;
            Ok(())
        }
        ClientMessage::Ping => {
            connection.send(&ServerMessage::Pong)?;
            Ok(())
        }
    }
}

/// Submit a message to the ingestion log.
///
/// The sender id is always the authenticated user of this connection. The
/// append is durable once it returns; persistence continues asynchronously.
async fn submit(
    state: &Arc<AppState>,
    connection: &Arc<ConnectionState>,
    body: String,
    target: String,
) -> Result<()> {
    if body.trim().is_empty() {
        counter!("gateway_invalid_submissions_total").increment(1);
        return Err(GatewayError::InvalidInput("empty body".to_string()));
    }
    if target.is_empty() {
        counter!("gateway_invalid_submissions_total").increment(1);
        return Err(GatewayError::InvalidInput("empty target".to_string()));
    }

    let raw = RawEvent {
        sender_id: connection.user_id.clone(),
        body,
        target: target.clone(),
        submitted_at: Utc::now(),
    };
    let payload = serde_json::to_vec(&raw)?;
    let subject = ingest_subject(&target);

    match tokio::time::timeout(
        state.submit_timeout,
        state.nats.append(subject, payload.into()),
    )
    .await
    {
        Ok(Ok(())) => {
            counter!("gateway_messages_submitted_total").increment(1);
            connection.send(&ServerMessage::Accepted { target })?;
            Ok(())
        }
        Ok(Err(e)) => {
            counter!("gateway_submit_failures_total").increment(1);
            Err(GatewayError::IngestUnavailable(e.to_string()))
        }
        Err(_) => {
            counter!("gateway_submit_failures_total").increment(1);
            Err(GatewayError::IngestUnavailable(format!(
                "append timed out after {:?}",
                state.submit_timeout
            )))
        }
    }
}

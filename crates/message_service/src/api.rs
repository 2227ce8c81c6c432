//! HTTP API handlers for the message service.
//!
//! The historical-fetch path: gateways pull room backlogs from here on join,
//! and external readers page through history the same way.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use common::{room_token, MessageEvent};
use message_store::MessageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

/// Default number of messages returned per history read.
const DEFAULT_LIMIT: i64 = 50;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms/{room}/messages", get(get_messages_handler))
        .with_state(Arc::new(state))
        .layer(CorsLayer::permissive())
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    messages: i64,
}

#[derive(Serialize)]
struct HistoryResponse {
    room: String,
    /// Messages ascending by canonical id (creation order).
    messages: Vec<MessageEvent>,
    count: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.store.message_count().await {
        Ok(messages) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            messages,
        })),
        Err(e) => {
            error!("Health check store error: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Recent messages of a room, ascending by creation order.
/// The path segment accepts either a raw room key or its partition token.
async fn get_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = room_token(&room);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    match state.store.recent_messages(&token, limit).await {
        Ok(messages) => {
            let count = messages.len();
            Ok(Json(HistoryResponse {
                room,
                messages,
                count,
            }))
        }
        Err(e) => {
            error!("Failed to fetch history for {}: {:?}", room, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

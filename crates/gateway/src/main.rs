//! Gateway service entry point.
//!
//! WebSocket gateway for real-time chat delivery. Horizontally scalable: any
//! number of gateway instances share the session directory and the fan-out
//! bus.

use anyhow::Result;
use gateway::{create_router, AppState, ConnectionRegistry, DeliveryRouter, RouterConfig, TokenVerifier};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::{IngestStreamConfig, NatsClient};
use session_store::{RoomRoster, SessionStore};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    // Read configuration from environment
    let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8082".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9093".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let message_service_url =
        env::var("MESSAGE_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());
    let jwt_secret = env::var("AUTH_JWT_SECRET").expect("AUTH_JWT_SECRET must be set");
    let session_ttl_secs: u64 = env::var("SESSION_TTL_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .expect("SESSION_TTL_SECS must be a number");
    let submit_timeout_ms: u64 = env::var("SUBMIT_TIMEOUT_MS")
        .unwrap_or_else(|_| "5000".to_string())
        .parse()
        .expect("SUBMIT_TIMEOUT_MS must be a number");
    let backlog_limit: usize = env::var("BACKLOG_LIMIT")
        .unwrap_or_else(|_| "50".to_string())
        .parse()
        .expect("BACKLOG_LIMIT must be a number");

    let gateway_id = format!("gw-{}", Uuid::new_v4());

    info!("Configuration:");
    info!("  GATEWAY_ID: {}", gateway_id);
    info!("  NATS_URL: {}", nats_url);
    info!("  REDIS_URL: {}", redis_url);
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  MESSAGE_SERVICE_URL: {}", message_service_url);
    info!("  SESSION_TTL_SECS: {}", session_ttl_secs);
    info!("  SUBMIT_TIMEOUT_MS: {}", submit_timeout_ms);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Connect to NATS and make sure the ingestion log exists before the
    // first submit needs it.
    let nats = Arc::new(NatsClient::connect(&nats_url).await?);
    nats.ensure_ingest_stream(&IngestStreamConfig::default())
        .await?;
    info!("Connected to NATS");

    // Session directory and room roster
    let sessions = SessionStore::new(&redis_url, session_ttl_secs)?;
    let roster = RoomRoster::new(&redis_url)?;
    info!("Connected to Redis");

    // Create connection registry
    let registry = Arc::new(ConnectionRegistry::new());

    // Create delivery router
    let router_config = RouterConfig {
        message_service_url,
        backlog_limit,
        ..Default::default()
    };
    let router = Arc::new(DeliveryRouter::new(
        registry.clone(),
        nats.clone(),
        router_config,
    ));

    // Create shutdown channel for router
    let (router_shutdown_tx, router_shutdown_rx) = mpsc::channel(1);

    // Spawn router task
    let router_clone = router.clone();
    let router_handle = tokio::spawn(async move {
        if let Err(e) = router_clone.run(router_shutdown_rx).await {
            error!("Router error: {:?}", e);
        }
    });

    // Create application state
    let state = Arc::new(AppState {
        registry,
        router,
        sessions,
        roster,
        nats,
        verifier: TokenVerifier::new(&jwt_secret),
        gateway_id,
        submit_timeout: Duration::from_millis(submit_timeout_ms),
    });

    // Create HTTP router
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown router
    info!("Shutting down router...");
    let _ = router_shutdown_tx.send(()).await;
    let _ = router_handle.await;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

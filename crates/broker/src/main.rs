//! Broker service entry point.
//!
//! Local stand-in for a hosted realtime messaging service.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use realtime_broker::{
    create_router, AppState, BrokerConfig, ConnectionRegistry, InMemorySessionStore,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

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

    info!("Starting realtime broker");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "4000".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let heartbeat_interval_ms: u64 = env::var("HEARTBEAT_INTERVAL_MS")
        .unwrap_or_else(|_| "30000".to_string())
        .parse()
        .expect("HEARTBEAT_INTERVAL_MS must be a number");
    let heartbeat_timeout_ms: u64 = env::var("HEARTBEAT_TIMEOUT_MS")
        .unwrap_or_else(|_| "60000".to_string())
        .parse()
        .expect("HEARTBEAT_TIMEOUT_MS must be a number");
    // Comma-separated "token:user_id" pairs for the in-memory session store.
    let session_tokens = env::var("SESSION_TOKENS").unwrap_or_default();

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  HEARTBEAT_INTERVAL_MS: {}", heartbeat_interval_ms);
    info!("  HEARTBEAT_TIMEOUT_MS: {}", heartbeat_timeout_ms);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    let config = BrokerConfig {
        heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
        heartbeat_timeout: Duration::from_millis(heartbeat_timeout_ms),
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let sessions = Arc::new(InMemorySessionStore::from_pairs(
        session_tokens.split(',').filter(|s| !s.is_empty()),
    ));

    // Heartbeat sweep: terminate connections that stopped answering pings.
    let sweep_registry = registry.clone();
    let sweep_interval = config.heartbeat_interval;
    let sweep_timeout = config.heartbeat_timeout.as_millis() as i64;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let swept = sweep_registry.sweep_stale(sweep_timeout);
            if swept > 0 {
                metrics::counter!("broker_heartbeat_terminations_total").increment(swept as u64);
            }
        }
    });

    let state = Arc::new(AppState {
        registry,
        sessions,
        config,
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Broker listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Broker stopped");
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

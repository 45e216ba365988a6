//! Gateway service entry point.
//!
//! WebSocket gateway pushing live wallet balances and prices to clients.

use anyhow::{anyhow, Result};
use gateway::{create_router, AppState, ConsumerGroups, EventRouter, GatewayConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::NatsClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = GatewayConfig::from_env()?;
    info!("Configuration:");
    info!("  NATS_URL: {}", config.nats_url);
    info!("  PORT: {}", config.port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  CONSUMER_GROUP_PREFIX: {}", config.group_prefix);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .map_err(|e| anyhow!("Failed to start Prometheus exporter: {}", e))?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let nats_client = Arc::new(NatsClient::connect(&config.nats_url).await?);
    info!("Connected to NATS");

    let groups = ConsumerGroups::generate(&config.group_prefix);
    let router = Arc::new(EventRouter::new(nats_client, groups));

    if let Err(e) = router.initialize().await {
        error!("Failed to initialize event router: {}", e);
        router.shutdown().await;
        return Err(e.into());
    }

    let (closing_tx, closing_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        router: router.clone(),
        closing: closing_rx,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    let failure_router = router.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                reason = failure_router.failed() => {
                    error!("Shutting down after fatal error: {}", reason);
                }
            }
            let _ = closing_tx.send(true);
        })
        .await;

    info!("Shutting down event router...");
    router.shutdown().await;

    served?;
    if let Some(reason) = router.failure() {
        return Err(anyhow!("event router failed: {}", reason));
    }

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

//! Price worker entry point.

use anyhow::{anyhow, Result};
use common::{Topic, WsManager, WsManagerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::{Broker, NatsClient};
use price_worker::{BinanceTickerHandler, PriceWorkerConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
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

    info!("Starting Price worker");

    let config = PriceWorkerConfig::from_env()?;
    info!("Configuration:");
    info!("  NATS_URL: {}", config.nats_url);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  BINANCE_STREAM_URL: {}", config.stream_url);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .map_err(|e| anyhow!("Failed to start Prometheus exporter: {}", e))?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let nats_client = Arc::new(NatsClient::connect(&config.nats_url).await?);
    nats_client.ensure_topic(Topic::PriceUpdate).await?;
    info!("Connected to NATS");

    let handler = BinanceTickerHandler::new(nats_client.clone(), config.stream_url.clone());
    let ws_config = WsManagerConfig {
        feed_label: "binance".to_string(),
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = WsManager::new(handler, ws_config, shutdown_rx).run().await;
    if let Err(e) = &result {
        error!("Ticker feed failed: {}", e);
    }

    if let Err(e) = nats_client.close().await {
        error!("Failed to close NATS connection: {:#}", e);
    }

    info!("Price worker stopped");
    result.map_err(Into::into)
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

//! Balance worker entry point.

use anyhow::{anyhow, Result};
use balance_worker::{BalanceWorker, BlockCypherClient, WorkerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::{Broker, NatsClient};
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

    info!("Starting Balance worker");

    let config = WorkerConfig::from_env()?;
    info!("Configuration:");
    info!("  NATS_URL: {}", config.nats_url);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  BLOCKCYPHER_API_URL: {}", config.api_url);
    info!("  BLOCKCYPHER_TOKEN: {}", if config.api_token.is_some() { "set" } else { "not set" });
    info!("  BALANCE_CONSUMER_GROUP: {}", config.consumer_group);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .map_err(|e| anyhow!("Failed to start Prometheus exporter: {}", e))?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let nats_client = Arc::new(NatsClient::connect(&config.nats_url).await?);
    info!("Connected to NATS");

    let lookup = BlockCypherClient::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.request_timeout,
    )?;
    let worker = BalanceWorker::new(nats_client.clone(), lookup, config.consumer_group.clone());

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = worker.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!("Balance worker failed: {:#}", e);
    }

    if let Err(e) = nats_client.close().await {
        error!("Failed to close NATS connection: {:#}", e);
    }

    info!("Balance worker stopped");
    result
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

//! Outbound WebSocket connection manager with ping, reconnection and
//! exponential backoff.

use crate::error::{Error, Result};
use crate::ws_handler::WsHandler;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Configuration for the WebSocket manager.
#[derive(Debug, Clone)]
pub struct WsManagerConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
    /// Initial delay before reconnection attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay (for exponential backoff).
    pub max_reconnect_delay: Duration,
    /// Label for metrics (e.g., "binance").
    pub feed_label: String,
}

impl Default for WsManagerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            feed_label: "unknown".to_string(),
        }
    }
}

/// Next reconnect delay: double the current one, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// WebSocket connection manager.
///
/// Keeps one feed connected until the shutdown channel fires or closes.
pub struct WsManager<H: WsHandler> {
    handler: Arc<H>,
    config: WsManagerConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<H: WsHandler> WsManager<H> {
    pub fn new(handler: H, config: WsManagerConfig, shutdown_rx: mpsc::Receiver<()>) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            shutdown_rx,
        }
    }

    /// Run until shutdown, reconnecting on every disconnect.
    ///
    /// A fatal handler error (see [`Error::is_fatal`]) stops the feed and is
    /// returned.
    pub async fn run(mut self) -> Result<()> {
        let label = self.config.feed_label.clone();
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            match self.connect_and_run_loop().await {
                Ok(()) => {
                    info!("[{}] WebSocket closed gracefully", label);
                    break;
                }
                Err(e) if e.is_fatal() => {
                    counter!("feed_errors_total", "feed" => label.clone(), "error_type" => "fatal")
                        .increment(1);
                    error!("[{}] Stopping feed: {}", label, e);
                    return Err(e);
                }
                Err(e) => {
                    counter!("feed_errors_total", "feed" => label.clone(), "error_type" => "disconnect")
                        .increment(1);
                    warn!(
                        "[{}] WebSocket disconnected: {:?}, reconnecting in {:?}",
                        label, e, reconnect_delay
                    );
                    self.handler.on_disconnect().await;

                    tokio::select! {
                        _ = self.shutdown_rx.recv() => {
                            info!("[{}] Shutdown during reconnect backoff", label);
                            break;
                        }
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }

                    reconnect_delay = next_backoff(reconnect_delay, self.config.max_reconnect_delay);
                }
            }
        }

        Ok(())
    }

    async fn connect_tcp(&self, url: &Url) -> Result<TcpStream> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Generic("No host in URL".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(443);
        let addr_str = format!("{}:{}", host, port);

        // Prefer IPv4 to avoid IPv6 timeout issues.
        let addrs: Vec<SocketAddr> = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Generic(format!("DNS resolution failed: {}", e)))?
            .collect();
        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        for addr in &sorted_addrs {
            debug!("[{}] Trying to connect to {}", self.config.feed_label, addr);
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.config.feed_label, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.config.feed_label, addr);
                }
            }
        }

        Err(Error::Generic("All connection attempts failed".to_string()))
    }

    fn tls_connector() -> Result<Connector> {
        let mut root_store = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            let _ = root_store.add(cert);
        }

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Generic(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Connector::Rustls(Arc::new(config)))
    }

    /// Returns Ok only on shutdown; every disconnect or fatal handler error
    /// is an error.
    async fn connect_and_run_loop(&mut self) -> Result<()> {
        let label = self.config.feed_label.clone();
        let url_str = self.handler.url().to_string();
        info!("[{}] Connecting to WebSocket: {}", label, url_str);

        let url = Url::parse(&url_str)?;
        let tcp_stream = self.connect_tcp(&url).await?;
        let connector = if url.scheme() == "wss" {
            Some(Self::tls_connector()?)
        } else {
            None
        };

        let (ws_stream, response) =
            client_async_tls_with_config(url_str.as_str(), tcp_stream, None, connector).await?;
        debug!("[{}] WebSocket handshake complete, status: {:?}", label, response.status());

        let (mut write, mut read) = ws_stream.split();

        gauge!("feed_active_connections", "feed" => label.clone()).increment(1.0);
        info!("[{}] WebSocket connected", label);

        if let Some(init_msg) = self.handler.on_connect_message() {
            debug!("[{}] Sending subscription: {}", label, init_msg);
            write.send(Message::Text(init_msg)).await?;
        }
        self.handler.on_reconnect().await;

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset();

        let result = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counter!("feed_messages_received_total", "feed" => label.clone()).increment(1);
                            if let Err(e) = self.handler.on_message(&text).await {
                                if e.is_fatal() {
                                    break Err(e);
                                }
                                error!("[{}] Error handling message: {:?}", label, e);
                                counter!("feed_errors_total", "feed" => label.clone(), "error_type" => "handler").increment(1);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Err(e) = self.handler.on_binary_message(&data).await {
                                if e.is_fatal() {
                                    break Err(e);
                                }
                                error!("[{}] Error handling binary message: {:?}", label, e);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!("[{}] Received close frame: {:?}", label, frame);
                            break Err(Error::ConnectionClosed);
                        }
                        Some(Err(e)) => break Err(Error::WebSocket(e)),
                        None => break Err(Error::ConnectionClosed),
                    }
                }

                // A closed channel counts as shutdown.
                _ = self.shutdown_rx.recv() => {
                    info!("[{}] Received shutdown signal", label);
                    let close_frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Shutdown".into(),
                    };
                    let _ = write.send(Message::Close(Some(close_frame))).await;
                    break Ok(());
                }

                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        break Err(e.into());
                    }
                }
            }
        };

        gauge!("feed_active_connections", "feed" => label).decrement(1.0);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_default_config() {
        let config = WsManagerConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    }
}

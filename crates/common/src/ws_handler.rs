//! Handler trait for outbound WebSocket feeds.

use crate::error::Result;
use async_trait::async_trait;

/// Implemented by feed adapters (e.g. an exchange ticker) driven by a
/// [`crate::WsManager`].
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Returns the WebSocket URL to connect to.
    fn url(&self) -> &str;

    /// Message to send right after connecting (e.g. a subscription payload).
    /// Return None if the URL already selects the streams.
    fn on_connect_message(&self) -> Option<String> {
        None
    }

    /// Called for every text frame. Implementations usually decode the frame
    /// and publish it to the broker. A fatal error stops the manager; any
    /// other error only skips the frame.
    async fn on_message(&self, msg: &str) -> Result<()>;

    /// Called for binary frames. Ignored by default.
    async fn on_binary_message(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Called when the connection is lost (before reconnect attempt).
    async fn on_disconnect(&self) {}

    /// Called after every successful (re)connection.
    async fn on_reconnect(&self) {}
}

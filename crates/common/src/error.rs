//! Error types for shared contracts and the outbound feed manager.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Invalid message key: {0:?}")]
    InvalidKey(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    /// Errors that end a feed instead of triggering a reconnect. A failed
    /// publish means the broker is gone and further ticks would be lost.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Publish(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_publish_failures_are_fatal() {
        assert!(Error::Publish("no responders".to_string()).is_fatal());
        assert!(!Error::ConnectionClosed.is_fatal());
        assert!(!Error::Generic("bad frame".to_string()).is_fatal());
    }
}

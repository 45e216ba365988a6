//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Broker error (connect, publish, subscribe, group management).
    #[error("Broker error: {0}")]
    Broker(#[from] anyhow::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client frame that parsed as JSON but has an unusable payload.
    #[error("Malformed client frame: {0}")]
    MalformedFrame(String),

    /// Broker message that cannot be routed.
    #[error("Malformed {topic} message: {reason}")]
    MalformedMessage { topic: &'static str, reason: String },

    /// Lifecycle operation attempted in the wrong state.
    #[error("Router is {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

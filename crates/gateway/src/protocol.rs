//! Client → server protocol.
//!
//! Frames are `{"type": ..., "data": ...}` JSON objects. Unknown types are
//! ignored so older gateways tolerate newer clients.

use crate::error::{GatewayError, Result};
use common::messages::{READ_BALANCE, SETUP_WALLET};
use common::ClientFrame;
use serde_json::Value;
use tracing::debug;

pub use common::ServerMessage;

/// A client request the gateway acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Watch a wallet address (replaces any previous one).
    SetupWallet { address: String },
    /// Ask for a fresh balance of the watched wallet.
    ReadBalance,
}

impl ClientMessage {
    /// Interpret a frame. Returns `Ok(None)` for types the gateway ignores.
    pub fn from_frame(frame: ClientFrame) -> Result<Option<Self>> {
        match frame.kind.as_str() {
            SETUP_WALLET => match frame.data {
                Some(Value::String(address)) => Ok(Some(ClientMessage::SetupWallet { address })),
                other => Err(GatewayError::MalformedFrame(format!(
                    "{} expects a string address, got {}",
                    SETUP_WALLET,
                    other.map(|v| v.to_string()).unwrap_or_else(|| "nothing".to_string())
                ))),
            },
            READ_BALANCE => Ok(Some(ClientMessage::ReadBalance)),
            other => {
                debug!("Ignoring client message of type '{}'", other);
                Ok(None)
            }
        }
    }
}

/// Parse a raw text or binary frame.
pub fn parse_frame(bytes: &[u8]) -> Result<ClientFrame> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_wallet() {
        let frame = parse_frame(br#"{"type":"setup-wallet","data":"0xabc"}"#).unwrap();
        assert_eq!(
            ClientMessage::from_frame(frame).unwrap(),
            Some(ClientMessage::SetupWallet {
                address: "0xabc".to_string()
            })
        );
    }

    #[test]
    fn test_read_balance_ignores_data() {
        let frame = parse_frame(br#"{"type":"read-balance","data":{"x":1}}"#).unwrap();
        assert_eq!(
            ClientMessage::from_frame(frame).unwrap(),
            Some(ClientMessage::ReadBalance)
        );
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let frame = parse_frame(br#"{"type":"subscribe","data":"btc"}"#).unwrap();
        assert_eq!(ClientMessage::from_frame(frame).unwrap(), None);
    }

    #[test]
    fn test_setup_wallet_requires_string() {
        let frame = parse_frame(br#"{"type":"setup-wallet","data":42}"#).unwrap();
        assert!(matches!(
            ClientMessage::from_frame(frame),
            Err(GatewayError::MalformedFrame(_))
        ));

        let frame = parse_frame(br#"{"type":"setup-wallet"}"#).unwrap();
        assert!(ClientMessage::from_frame(frame).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse_frame(b"not json"), Err(GatewayError::Json(_))));
        assert!(parse_frame(br#"{"data":"x"}"#).is_err());
    }
}

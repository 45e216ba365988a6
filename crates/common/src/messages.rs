//! Message contracts shared by the gateway, the workers and the CLI.
//!
//! Broker payloads travel as JSON values on the topics in [`crate::topics`];
//! client frames travel over the WebSocket as `{type, data}` envelopes.

use crate::currency::Currency;
use serde::{Deserialize, Serialize};

// ============================================================================
// Broker payloads
// ============================================================================

/// Value of a `price-update` message (key: currency).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: f64,
}

/// Value of a `balance-request` message (key: address).
///
/// `currency` stays a string so that a worker can report an unsupported
/// currency back to the client instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub address: String,
    pub currency: String,
}

impl BalanceRequest {
    pub fn new(address: impl Into<String>, currency: Currency) -> Self {
        Self {
            address: address.into(),
            currency: currency.as_str().to_string(),
        }
    }
}

/// Value of a `balance-result` message (key: address). Already in coins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub balance: f64,
}

/// Value of a `balance-error` message (key: address).
///
/// The same shape is forwarded verbatim to clients as `error` event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceError {
    #[serde(default)]
    pub address: String,
    pub error: String,
    #[serde(default)]
    pub is_not_found: bool,
    #[serde(default)]
    pub is_rate_limit: bool,
}

impl BalanceError {
    /// A failure that is neither not-found nor rate-limited.
    pub fn generic(address: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            error: error.into(),
            is_not_found: false,
            is_rate_limit: false,
        }
    }
}

// ============================================================================
// Client envelope
// ============================================================================

/// Client → server message types.
pub const SETUP_WALLET: &str = "setup-wallet";
pub const READ_BALANCE: &str = "read-balance";

/// Raw client → server frame.
///
/// `type` is kept as a string so unknown types can be ignored rather than
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ClientFrame {
    pub fn setup_wallet(address: impl Into<String>) -> Self {
        Self {
            kind: SETUP_WALLET.to_string(),
            data: Some(serde_json::Value::String(address.into())),
        }
    }

    pub fn read_balance() -> Self {
        Self {
            kind: READ_BALANCE.to_string(),
            data: None,
        }
    }
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Latest price of the session's currency.
    PriceUpdated { price: f64 },
    /// Latest balance of the session's wallet, in coins.
    BalanceUpdated { balance: f64 },
    /// Lookup failure or rejected request.
    Error(BalanceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_wire_format() {
        let msg = ServerMessage::PriceUpdated { price: 61000.5 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "price-updated", "data": {"price": 61000.5}})
        );

        let msg = ServerMessage::Error(BalanceError {
            address: "0xabc".to_string(),
            error: "Limits reached.".to_string(),
            is_not_found: false,
            is_rate_limit: true,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "error",
                "data": {
                    "address": "0xabc",
                    "error": "Limits reached.",
                    "isNotFound": false,
                    "isRateLimit": true
                }
            })
        );
    }

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"setup-wallet","data":"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"}"#)
                .unwrap();
        assert_eq!(frame, ClientFrame::setup_wallet("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"read-balance"}"#).unwrap();
        assert_eq!(frame, ClientFrame::read_balance());

        assert!(serde_json::from_str::<ClientFrame>(r#"{"data":"x"}"#).is_err());
    }

    #[test]
    fn test_balance_error_defaults() {
        // Older workers do not send isRateLimit.
        let err: BalanceError = serde_json::from_str(
            r#"{"address":"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa","error":"boom","isNotFound":true}"#,
        )
        .unwrap();
        assert!(err.is_not_found);
        assert!(!err.is_rate_limit);
    }

    #[test]
    fn test_balance_request_from_currency() {
        let req = BalanceRequest::new("0xabc", Currency::Eth);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"address": "0xabc", "currency": "eth"})
        );
    }
}

//! Shared contracts for the wallet watch services.
//!
//! - [`currency`]: the closed set of supported currencies and address
//!   classification
//! - [`topics`]: broker topic names and key rules
//! - [`messages`]: broker payloads and the client WebSocket envelope
//! - [`ws_manager`]: reconnecting client for outbound WebSocket feeds

pub mod currency;
pub mod error;
pub mod messages;
pub mod topics;
pub mod ws_handler;
pub mod ws_manager;

pub use currency::Currency;
pub use error::{Error, Result};
pub use messages::{
    BalanceError, BalanceRequest, BalanceResult, ClientFrame, PriceUpdate, ServerMessage,
};
pub use topics::Topic;
pub use ws_handler::WsHandler;
pub use ws_manager::{WsManager, WsManagerConfig};

//! Gateway service for live wallet balances and prices over WebSocket.
//!
//! This service:
//! - Accepts WebSocket connections from wallet clients
//! - Tracks which wallet each connection is watching
//! - Consumes price, balance and balance-error events from the broker
//! - Pushes each event to the connections watching that currency or address
//! - Publishes balance requests for the balance workers
//!
//! ## Architecture
//!
//! ```text
//! NATS: price-update / balance-result / balance-error
//!         ↓ (per-instance consumer groups)
//! EventRouter (caches + ClientRegistry)
//!         ↓                         ↑ setup-wallet / read-balance
//! WebSocket clients ────────────────┘
//!         ↓
//! NATS: balance-request
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod router;
pub mod ws_server;

pub use cache::{BalanceCache, LastValueCache, PriceCache};
pub use client::{ClientId, ClientRegistry, ClientState, WalletInterest};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use protocol::{ClientMessage, ServerMessage};
pub use router::{ConsumerGroups, EventRouter, RouterState};
pub use ws_server::{create_router, AppState};

//! Balance worker: answers `balance-request` messages with balances looked
//! up on BlockCypher.
//!
//! ```text
//! NATS: balance-request (shared group)
//!         ↓
//! BalanceWorker ──▶ BlockCypher /{currency}/main/addrs/{address}/balance
//!         ↓
//! NATS: balance-result | balance-error   (key: address)
//! ```
//!
//! Several workers can run side by side; the shared consumer group splits
//! the requests between them.

pub mod blockcypher;
pub mod config;
pub mod error;
pub mod worker;

pub use blockcypher::{BalanceLookup, BlockCypherClient};
pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use worker::BalanceWorker;

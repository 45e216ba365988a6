//! Broker access for the wallet watch services.
//!
//! [`Broker`] is the capability the router and the workers consume: keyed
//! publish, per-consumer-group subscription, and group deletion.
//! [`NatsClient`] implements it on NATS JetStream; `MemoryBroker` (feature
//! `testkit`) implements it in memory for tests.

pub mod broker;
pub mod client;
#[cfg(any(test, feature = "testkit"))]
pub mod memory;

pub use broker::{Broker, KeyedMessage, MessageStream};
pub use client::{NatsClient, StreamConfig};
#[cfg(any(test, feature = "testkit"))]
pub use memory::{MemoryBroker, PublishedMessage};

//! Broker capability trait.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use common::Topic;
use futures::stream::BoxStream;

/// A message received from a topic, with its routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedMessage {
    pub key: String,
    pub payload: Bytes,
}

impl KeyedMessage {
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Messages delivered to one consumer group. An `Err` item means the
/// broker connection failed; the stream ending means the subscription is gone.
pub type MessageStream = BoxStream<'static, Result<KeyedMessage>>;

/// Durable pub/sub transport with topics and consumer groups.
///
/// Distinct groups on the same topic each receive every message
/// (broadcast); subscriptions sharing a group split the messages
/// (work-sharing). Messages with the same key keep their publish order.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make sure the topic exists before publishing or subscribing.
    async fn ensure_topic(&self, topic: Topic) -> Result<()>;

    /// Publish `payload` under `key`, waiting for the broker to accept it.
    async fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> Result<()>;

    /// Join `group` on `topic`, receiving only messages published from now on.
    async fn subscribe(&self, topic: Topic, group: &str) -> Result<MessageStream>;

    /// Remove a consumer group and its offsets.
    async fn delete_group(&self, topic: Topic, group: &str) -> Result<()>;

    /// Flush pending publishes and disconnect. The broker must not be used
    /// afterwards.
    async fn close(&self) -> Result<()>;
}

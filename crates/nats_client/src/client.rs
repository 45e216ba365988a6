//! NATS JetStream implementation of [`Broker`].
//!
//! Topic mapping:
//! - one stream per topic (`PRICE_UPDATE`), capturing `price-update.>`
//! - a message keyed `btc` is published on `price-update.btc`, so JetStream's
//!   per-subject ordering gives per-key ordering
//! - a consumer group is a durable pull consumer on the topic's stream

use crate::broker::{Broker, KeyedMessage, MessageStream};
use anyhow::{anyhow, Result};
use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::{self, stream::Stream};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use common::Topic;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// Default retention period for topic streams (1 hour).
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Default max messages per stream.
pub const DEFAULT_MAX_MESSAGES: i64 = 1_000_000;

/// Default max bytes per stream (256MB).
pub const DEFAULT_MAX_BYTES: i64 = 268_435_456;

/// Configuration for creating a stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,
    /// Subject patterns to capture.
    pub subjects: Vec<String>,
    /// Retention period in seconds.
    pub max_age_secs: u64,
    /// Maximum number of messages.
    pub max_messages: i64,
    /// Maximum bytes.
    pub max_bytes: i64,
}

impl StreamConfig {
    /// Stream config backing a topic: `PRICE_UPDATE` capturing `price-update.>`.
    pub fn for_topic(topic: Topic) -> Self {
        Self {
            name: topic.stream_name(),
            subjects: vec![topic.filter_subject()],
            max_age_secs: DEFAULT_RETENTION_SECS,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Set retention period in seconds.
    pub fn with_retention(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }
}

/// Wrapper around the NATS client with JetStream context.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
    retention_secs: u64,
}

impl NatsClient {
    /// Connect to a NATS server and create a JetStream context.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            retention_secs: DEFAULT_RETENTION_SECS,
        })
    }

    /// Override the retention applied to streams created by `ensure_topic`.
    pub fn with_retention(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    /// Create or get a stream with the given configuration.
    pub async fn ensure_stream_with_config(&self, config: &StreamConfig) -> Result<Stream> {
        info!(
            "Ensuring stream '{}' exists (subjects: {:?}, retention: {}s)",
            config.name, config.subjects, config.max_age_secs
        );

        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.name.clone(),
                subjects: config.subjects.clone(),
                retention: jetstream::stream::RetentionPolicy::Limits,
                max_messages: config.max_messages,
                max_bytes: config.max_bytes,
                max_age: Duration::from_secs(config.max_age_secs),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await?;

        info!("Stream '{}' ready", config.name);
        Ok(stream)
    }
}

#[async_trait]
impl Broker for NatsClient {
    async fn ensure_topic(&self, topic: Topic) -> Result<()> {
        let config = StreamConfig::for_topic(topic).with_retention(self.retention_secs);
        self.ensure_stream_with_config(&config).await?;
        Ok(())
    }

    async fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> Result<()> {
        let subject = topic.subject(key)?;
        debug!("Publishing {} bytes to {}", payload.len(), subject);
        self.jetstream.publish(subject, payload).await?.await?;
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, group: &str) -> Result<MessageStream> {
        info!("Joining consumer group '{}' on topic '{}'", group, topic);

        let stream = self.jetstream.get_stream(topic.stream_name()).await?;
        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    filter_subject: topic.filter_subject(),
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;
        let messages = consumer.messages().await?;

        let stream = messages
            .then(move |delivery| async move {
                let msg = delivery.map_err(|e| anyhow!("consumer stream failed: {}", e))?;
                msg.ack()
                    .await
                    .map_err(|e| anyhow!("failed to ack message: {}", e))?;

                // An unexpected subject yields an empty key, which consumers
                // reject as malformed.
                let key = topic
                    .key_from_subject(msg.message.subject.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(KeyedMessage {
                    key,
                    payload: msg.message.payload.clone(),
                })
            })
            .boxed();

        Ok(stream)
    }

    async fn delete_group(&self, topic: Topic, group: &str) -> Result<()> {
        let stream = self.jetstream.get_stream(topic.stream_name()).await?;
        stream.delete_consumer(group).await?;
        info!("Deleted consumer group '{}' on topic '{}'", group, topic);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.flush().await?;
        self.client.drain().await?;
        info!("NATS connection drained");
        Ok(())
    }
}

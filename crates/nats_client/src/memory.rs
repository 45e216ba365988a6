//! In-memory [`Broker`] for tests.
//!
//! Each consumer group gets its own channel, so every group on a topic sees
//! every message published after it subscribed. Published messages and group
//! deletions are recorded for assertions.

use crate::broker::{Broker, KeyedMessage, MessageStream};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use common::Topic;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A message recorded by [`MemoryBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: Topic,
    pub key: String,
    pub payload: Bytes,
}

#[derive(Default)]
struct Inner {
    topics: HashSet<Topic>,
    published: Vec<PublishedMessage>,
    groups: HashMap<(Topic, String), mpsc::UnboundedSender<Result<KeyedMessage>>>,
    deleted: Vec<(Topic, String)>,
    close_count: usize,
    fail_publish: bool,
}

#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with every topic already created.
    pub fn with_all_topics() -> Self {
        let broker = Self::new();
        broker.lock().topics.extend(Topic::ALL);
        broker
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything published on `topic`, in order.
    pub fn published(&self, topic: Topic) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Groups deleted so far, in order.
    pub fn deleted_groups(&self) -> Vec<(Topic, String)> {
        self.lock().deleted.clone()
    }

    /// Groups currently subscribed to `topic`.
    pub fn active_groups(&self, topic: Topic) -> Vec<String> {
        let mut groups: Vec<String> = self
            .lock()
            .groups
            .keys()
            .filter(|(t, _)| *t == topic)
            .map(|(_, g)| g.clone())
            .collect();
        groups.sort();
        groups
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Make subsequent publishes fail.
    pub fn fail_publishes(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// Deliver a connection error to every group subscribed to `topic`.
    pub fn fail_topic(&self, topic: Topic, reason: &str) {
        for ((t, _), tx) in self.lock().groups.iter() {
            if *t == topic {
                let _ = tx.unbounded_send(Err(anyhow!("{}", reason)));
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_topic(&self, topic: Topic) -> Result<()> {
        self.lock().topics.insert(topic);
        Ok(())
    }

    async fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> Result<()> {
        common::topics::validate_key(key)?;
        let mut inner = self.lock();
        if inner.fail_publish {
            bail!("publish to '{}' failed: broker unavailable", topic);
        }
        if !inner.topics.contains(&topic) {
            bail!("no stream for topic '{}'", topic);
        }

        inner.published.push(PublishedMessage {
            topic,
            key: key.to_string(),
            payload: payload.clone(),
        });
        for ((t, _), tx) in inner.groups.iter() {
            if *t == topic {
                let _ = tx.unbounded_send(Ok(KeyedMessage::new(key, payload.clone())));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, group: &str) -> Result<MessageStream> {
        let mut inner = self.lock();
        if !inner.topics.contains(&topic) {
            bail!("no stream for topic '{}'", topic);
        }
        let (tx, rx) = mpsc::unbounded();
        inner.groups.insert((topic, group.to_string()), tx);
        Ok(rx.boxed())
    }

    async fn delete_group(&self, topic: Topic, group: &str) -> Result<()> {
        let mut inner = self.lock();
        // Dropping the sender ends the group's stream.
        if inner.groups.remove(&(topic, group.to_string())).is_none() {
            bail!("consumer group '{}' not found on '{}'", group, topic);
        }
        inner.deleted.push((topic, group.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().close_count += 1;
        Ok(())
    }
}

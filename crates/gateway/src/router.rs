//! Event router: broker topics ↔ WebSocket sessions.
//!
//! Consumes `price-update`, `balance-result` and `balance-error` under
//! per-instance consumer groups, keeps the latest price and balance values,
//! and fans each event out to the sessions watching the matching currency or
//! address. Client requests turn into `balance-request` messages.
//!
//! ```text
//! price-update ──┐                       ┌─▶ session (btc wallet)
//! balance-result ┼─▶ EventRouter ─▶ registry ─▶ session (eth wallet)
//! balance-error ─┘        │              └─▶ ...
//!                         └─▶ balance-request
//! ```

use crate::cache::{BalanceCache, PriceCache};
use crate::client::{ClientId, ClientRegistry, WalletInterest};
use crate::error::{GatewayError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use axum::extract::ws::Message;
use chrono::Utc;
use common::{BalanceError, BalanceRequest, BalanceResult, ClientFrame, Currency, PriceUpdate, Topic};
use futures::StreamExt;
use metrics::{counter, gauge};
use nats_client::{Broker, KeyedMessage, MessageStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default prefix for this instance's consumer group names.
pub const DEFAULT_GROUP_PREFIX: &str = "server";

/// Lifecycle of an [`EventRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    Created,
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl RouterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterState::Created => "created",
            RouterState::Initializing => "initializing",
            RouterState::Running => "running",
            RouterState::Draining => "draining",
            RouterState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer group names owned by one router instance.
///
/// Every instance gets its own groups so each gateway sees every event.
/// The groups are deleted on shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroups {
    pub price: String,
    pub balance: String,
    pub error: String,
}

impl ConsumerGroups {
    /// `{prefix}-{price|balance|error}-{unix_millis}-{8 hex chars}`
    pub fn generate(prefix: &str) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        let instance = format!("{}-{}", Utc::now().timestamp_millis(), &uuid[..8]);
        Self {
            price: format!("{}-price-{}", prefix, instance),
            balance: format!("{}-balance-{}", prefix, instance),
            error: format!("{}-error-{}", prefix, instance),
        }
    }

    /// The consumed topics paired with their group names.
    pub fn all(&self) -> [(Topic, &str); 3] {
        [
            (Topic::PriceUpdate, self.price.as_str()),
            (Topic::BalanceResult, self.balance.as_str()),
            (Topic::BalanceError, self.error.as_str()),
        ]
    }
}

#[derive(Default)]
struct Lifecycle {
    tasks: Vec<JoinHandle<()>>,
    joined: Vec<(Topic, String)>,
}

/// Routes broker events to sessions and session requests to the broker.
pub struct EventRouter {
    broker: Arc<dyn Broker>,
    registry: ClientRegistry,
    prices: PriceCache,
    balances: BalanceCache,
    groups: ConsumerGroups,
    state: watch::Sender<RouterState>,
    shutdown: watch::Sender<bool>,
    failure: watch::Sender<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
}

impl EventRouter {
    pub fn new(broker: Arc<dyn Broker>, groups: ConsumerGroups) -> Self {
        Self {
            broker,
            registry: ClientRegistry::new(),
            prices: PriceCache::new(),
            balances: BalanceCache::new(),
            groups,
            state: watch::Sender::new(RouterState::Created),
            shutdown: watch::Sender::new(false),
            failure: watch::Sender::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    pub fn groups(&self) -> &ConsumerGroups {
        &self.groups
    }

    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    pub fn interest_count(&self) -> usize {
        self.registry.interest_count()
    }

    /// The wallet a session currently watches.
    pub fn wallet(&self, id: &ClientId) -> Option<WalletInterest> {
        self.registry.wallet(id)
    }

    pub fn cached_price(&self, currency: Currency) -> Option<f64> {
        self.prices.get(&currency)
    }

    pub fn cached_balance(&self, address: &str) -> Option<f64> {
        self.balances.get(address)
    }

    fn set_state(&self, state: RouterState) {
        let previous = self.state.send_replace(state);
        debug!("Event router {} -> {}", previous, state);
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Register a session. Returns false if the id is already known.
    pub fn add_client(&self, id: ClientId, tx: mpsc::Sender<Message>) -> bool {
        let added = self.registry.register(id, tx);
        gauge!("gateway_active_connections").set(self.registry.client_count() as f64);
        added
    }

    /// Drop a session and its wallet interest. Unknown ids are ignored.
    pub fn remove_client(&self, id: &ClientId) {
        if let Some(wallet) = self.registry.unregister(id) {
            debug!("Client {} stopped watching {}", id, wallet.address);
        }
        gauge!("gateway_active_connections").set(self.registry.client_count() as f64);
    }

    /// Act on a frame received from a session.
    pub async fn handle_client_message(&self, id: ClientId, frame: ClientFrame) -> Result<()> {
        match ClientMessage::from_frame(frame)? {
            Some(ClientMessage::SetupWallet { address }) => self.setup_wallet(id, &address).await,
            Some(ClientMessage::ReadBalance) => self.read_balance(id).await,
            None => Ok(()),
        }
    }

    async fn setup_wallet(&self, id: ClientId, address: &str) -> Result<()> {
        let address = address.trim();
        let Some(currency) = Currency::from_address(address) else {
            info!("Client {} sent unsupported address '{}'", id, address);
            let msg = ServerMessage::Error(BalanceError::generic(
                address,
                format!("Unsupported wallet address format: {}", address),
            ));
            self.registry.send(&id, &msg)?;
            return Ok(());
        };

        let wallet = WalletInterest {
            address: address.to_string(),
            currency,
        };
        if !self.registry.set_wallet(&id, wallet.clone()) {
            debug!("setup-wallet from unknown client {}", id);
            return Ok(());
        }
        info!("Client {} watching {} wallet {}", id, currency, address);

        if let Some(price) = self.prices.get(&currency) {
            self.registry.send(&id, &ServerMessage::PriceUpdated { price })?;
        }
        match self.balances.get(address) {
            Some(balance) => {
                self.registry.send(&id, &ServerMessage::BalanceUpdated { balance })?;
                Ok(())
            }
            None => self.request_balance(&wallet).await,
        }
    }

    async fn read_balance(&self, id: ClientId) -> Result<()> {
        match self.registry.wallet(&id) {
            Some(wallet) => self.request_balance(&wallet).await,
            None => {
                debug!("read-balance from client {} with no wallet", id);
                Ok(())
            }
        }
    }

    async fn request_balance(&self, wallet: &WalletInterest) -> Result<()> {
        if matches!(self.state(), RouterState::Draining | RouterState::Stopped) {
            debug!("Not requesting balance for {} while {}", wallet.address, self.state());
            return Ok(());
        }

        let payload = serde_json::to_vec(&BalanceRequest::new(&wallet.address, wallet.currency))?;
        if let Err(e) = self
            .broker
            .publish(Topic::BalanceRequest, &wallet.address, payload.into())
            .await
        {
            self.fail(format!(
                "failed to publish balance request for {}: {:#}",
                wallet.address, e
            ));
            return Err(GatewayError::Broker(e));
        }

        counter!("router_balance_requests_total").increment(1);
        debug!("Requested {} balance for {}", wallet.currency, wallet.address);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Broker events
    // ------------------------------------------------------------------

    /// Cache a price and push it to sessions watching `currency`.
    pub fn on_price_message(&self, currency: Currency, price: f64) -> Result<usize> {
        self.prices.set(currency, price);
        let sent = self
            .registry
            .broadcast(&ServerMessage::PriceUpdated { price }, |w| w.currency == currency)?;
        counter!("router_broadcasts_total", "event" => "price-updated").increment(1);
        debug!("{} price {} sent to {} clients", currency, price, sent);
        Ok(sent)
    }

    /// Cache a balance and push it to sessions watching `address`.
    pub fn on_balance_message(&self, address: &str, balance: f64) -> Result<usize> {
        self.balances.set(address.to_string(), balance);
        let sent = self
            .registry
            .broadcast(&ServerMessage::BalanceUpdated { balance }, |w| w.address == address)?;
        counter!("router_broadcasts_total", "event" => "balance-updated").increment(1);
        debug!("Balance {} for {} sent to {} clients", balance, address, sent);
        Ok(sent)
    }

    /// Push a lookup failure to sessions watching `address`. Not cached.
    pub fn on_balance_error_message(
        &self,
        address: &str,
        error: &str,
        is_not_found: bool,
        is_rate_limit: bool,
    ) -> Result<usize> {
        let msg = ServerMessage::Error(BalanceError {
            address: address.to_string(),
            error: error.to_string(),
            is_not_found,
            is_rate_limit,
        });
        let sent = self.registry.broadcast(&msg, |w| w.address == address)?;
        counter!("router_broadcasts_total", "event" => "error").increment(1);
        debug!("Balance error for {} sent to {} clients: {}", address, sent, error);
        Ok(sent)
    }

    /// Decode one broker message and hand it to the matching handler.
    fn dispatch(&self, topic: Topic, msg: &KeyedMessage) -> Result<usize> {
        match topic {
            Topic::PriceUpdate => {
                let currency: Currency = msg
                    .key
                    .parse()
                    .map_err(|_| malformed(topic, format!("unknown currency key '{}'", msg.key)))?;
                let update: PriceUpdate = decode(topic, msg)?;
                self.on_price_message(currency, update.price)
            }
            Topic::BalanceResult => {
                let address = routing_key(topic, msg)?;
                let result: BalanceResult = decode(topic, msg)?;
                self.on_balance_message(address, result.balance)
            }
            Topic::BalanceError => {
                let address = routing_key(topic, msg)?;
                let err: BalanceError = decode(topic, msg)?;
                self.on_balance_error_message(
                    address,
                    &err.error,
                    err.is_not_found,
                    err.is_rate_limit,
                )
            }
            Topic::BalanceRequest => Err(malformed(topic, "not consumed by the gateway".to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create the topics, join this instance's consumer groups and start
    /// consuming. Only valid once, from `Created`.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state != RouterState::Created {
            return Err(GatewayError::InvalidState {
                state: state.as_str(),
                expected: RouterState::Created.as_str(),
            });
        }
        self.set_state(RouterState::Initializing);

        for topic in Topic::ALL {
            self.broker.ensure_topic(topic).await?;
        }

        let mut streams = Vec::with_capacity(3);
        for (topic, group) in self.groups.all() {
            let stream = self.broker.subscribe(topic, group).await?;
            lifecycle.joined.push((topic, group.to_string()));
            streams.push((topic, stream));
        }

        for (topic, stream) in streams {
            let router = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            lifecycle
                .tasks
                .push(tokio::spawn(router.consume(topic, stream, shutdown)));
        }

        self.set_state(RouterState::Running);
        info!(
            "Event router running (groups: {}, {}, {})",
            self.groups.price, self.groups.balance, self.groups.error
        );
        Ok(())
    }

    /// Stop consuming, delete this instance's consumer groups and close the
    /// broker. Later calls return immediately.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            RouterState::Draining | RouterState::Stopped => {
                debug!("Event router already stopped");
                return;
            }
            RouterState::Created => {
                self.set_state(RouterState::Stopped);
                info!("Event router stopped before it was initialized");
                return;
            }
            RouterState::Initializing | RouterState::Running => {}
        }

        info!("Draining event router");
        self.set_state(RouterState::Draining);
        self.shutdown.send_replace(true);

        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Consumer task ended abnormally: {}", e);
            }
        }

        for (topic, group) in lifecycle.joined.drain(..) {
            if let Err(e) = self.broker.delete_group(topic, &group).await {
                warn!("Failed to delete consumer group '{}': {:#}", group, e);
            }
        }

        if let Err(e) = self.broker.close().await {
            warn!("Failed to close broker: {:#}", e);
        }

        self.set_state(RouterState::Stopped);
        info!("Event router stopped");
    }

    /// Resolves with the reason once the router hits a fatal error.
    pub async fn failed(&self) -> String {
        let mut rx = self.failure.subscribe();
        if rx.wait_for(Option::is_some).await.is_err() {
            return "event router dropped".to_string();
        }
        let reason = rx.borrow().clone().unwrap_or_default();
        reason
    }

    /// The recorded fatal error, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure.borrow().clone()
    }

    fn fail(&self, reason: String) {
        let first = self.failure.send_if_modified(|failure| {
            if failure.is_none() {
                *failure = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if first {
            error!("Event router failed: {}", reason);
        }
    }

    async fn consume(
        self: Arc<Self>,
        topic: Topic,
        mut stream: MessageStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Consumer for '{}' started", topic);

        loop {
            let next = tokio::select! {
                biased;

                _ = stopped(&mut shutdown) => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(msg)) => {
                    counter!("router_messages_total", "topic" => topic.as_str()).increment(1);
                    if let Err(e) = self.dispatch(topic, &msg) {
                        warn!("Skipping {} message '{}': {}", topic, msg.key, e);
                        counter!("router_malformed_messages_total", "topic" => topic.as_str())
                            .increment(1);
                    }
                }
                Some(Err(e)) => {
                    self.fail_while_active(format!("consumer for '{}' failed: {:#}", topic, e));
                    break;
                }
                None => {
                    self.fail_while_active(format!("consumer for '{}' ended unexpectedly", topic));
                    break;
                }
            }
        }

        debug!("Consumer for '{}' stopped", topic);
    }

    fn fail_while_active(&self, reason: String) {
        if matches!(self.state(), RouterState::Initializing | RouterState::Running) {
            self.fail(reason);
        } else {
            debug!("Ignoring during shutdown: {}", reason);
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn malformed(topic: Topic, reason: String) -> GatewayError {
    GatewayError::MalformedMessage {
        topic: topic.as_str(),
        reason,
    }
}

fn decode<T: DeserializeOwned>(topic: Topic, msg: &KeyedMessage) -> Result<T> {
    serde_json::from_slice(&msg.payload).map_err(|e| malformed(topic, e.to_string()))
}

fn routing_key(topic: Topic, msg: &KeyedMessage) -> Result<&str> {
    if msg.key.is_empty() {
        return Err(malformed(topic, "missing address key".to_string()));
    }
    Ok(&msg.key)
}

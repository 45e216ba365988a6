//! Client sessions and the registry of wallet interests.
//!
//! Each session's wallet interest lives inside its registry entry, so
//! unregistering a session drops its interest in the same map operation.

use crate::error::Result;
use axum::extract::ws::Message;
use common::{Currency, ServerMessage};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique client session identifier.
pub type ClientId = Uuid;

/// Buffer size for each client's outbound channel.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// The wallet a session is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInterest {
    pub address: String,
    pub currency: Currency,
}

/// State for a single connected client.
pub struct ClientState {
    /// Channel to the client's WebSocket writer.
    pub tx: mpsc::Sender<Message>,
    /// Wallet registered with `setup-wallet`, if any.
    pub wallet: Option<WalletInterest>,
}

impl ClientState {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            tx,
            wallet: None,
        }
    }

    /// Queue a frame without waiting. Returns false if the client is gone
    /// or its buffer is full.
    fn try_send_raw(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Client buffer full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Encode a server message as a WebSocket text frame.
pub fn encode(msg: &ServerMessage) -> Result<Message> {
    let json = serde_json::to_string(msg)?;
    Ok(Message::Text(json.into()))
}

/// Registry of connected clients and the wallets they watch.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, ClientState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. An id that is already registered keeps its
    /// existing state and returns false.
    pub fn register(&self, id: ClientId, tx: mpsc::Sender<Message>) -> bool {
        let mut inserted = false;
        self.clients.entry(id).or_insert_with(|| {
            inserted = true;
            ClientState::new(tx)
        });
        if inserted {
            info!("Registered client {}", id);
        }
        inserted
    }

    /// Remove a session together with its wallet interest.
    pub fn unregister(&self, id: &ClientId) -> Option<WalletInterest> {
        let (_, state) = self.clients.remove(id)?;
        info!("Unregistered client {}", id);
        state.wallet
    }

    /// Replace the session's wallet interest. Returns false for an unknown
    /// session.
    pub fn set_wallet(&self, id: &ClientId, wallet: WalletInterest) -> bool {
        match self.clients.get_mut(id) {
            Some(mut state) => {
                debug!("Client {} watching {} ({})", id, wallet.address, wallet.currency);
                state.wallet = Some(wallet);
                true
            }
            None => false,
        }
    }

    /// The session's wallet interest, if it has one.
    pub fn wallet(&self, id: &ClientId) -> Option<WalletInterest> {
        self.clients.get(id).and_then(|state| state.wallet.clone())
    }

    /// Send to one session. Returns false if the session is unknown or
    /// the frame could not be queued.
    pub fn send(&self, id: &ClientId, msg: &ServerMessage) -> Result<bool> {
        let frame = encode(msg)?;
        Ok(self
            .clients
            .get(id)
            .map(|state| state.try_send_raw(frame))
            .unwrap_or(false))
    }

    /// Send to every session whose wallet matches `filter`.
    ///
    /// The message is serialized once. Sessions that cannot take the frame
    /// are skipped. Returns how many sessions it was queued for.
    pub fn broadcast<F>(&self, msg: &ServerMessage, filter: F) -> Result<usize>
    where
        F: Fn(&WalletInterest) -> bool,
    {
        let frame = encode(msg)?;
        let mut sent = 0;
        for entry in self.clients.iter() {
            let matches = entry.wallet.as_ref().is_some_and(&filter);
            if matches && entry.try_send_raw(frame.clone()) {
                sent += 1;
            }
        }
        Ok(sent)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Sessions that have registered a wallet.
    pub fn interest_count(&self) -> usize {
        self.clients.iter().filter(|e| e.wallet.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_ADDR: &str = "0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae";
    const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn interest(address: &str, currency: Currency) -> WalletInterest {
        WalletInterest {
            address: address.to_string(),
            currency,
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);

        assert!(registry.register(id, tx.clone()));
        registry.set_wallet(&id, interest(ETH_ADDR, Currency::Eth));
        assert!(!registry.register(id, tx));

        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.wallet(&id), Some(interest(ETH_ADDR, Currency::Eth)));
    }

    #[test]
    fn test_unregister_drops_interest() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);
        registry.register(id, tx);
        registry.set_wallet(&id, interest(BTC_ADDR, Currency::Btc));
        assert_eq!(registry.interest_count(), 1);

        assert_eq!(registry.unregister(&id), Some(interest(BTC_ADDR, Currency::Btc)));
        assert_eq!(registry.client_count(), 0);
        assert_eq!(registry.interest_count(), 0);
        assert_eq!(registry.unregister(&id), None);
    }

    #[test]
    fn test_set_wallet_unknown_session() {
        let registry = ClientRegistry::new();
        assert!(!registry.set_wallet(&Uuid::new_v4(), interest(ETH_ADDR, Currency::Eth)));
    }

    #[test]
    fn test_broadcast_filters_and_skips_full_clients() {
        let registry = ClientRegistry::new();

        let (eth_tx, mut eth_rx) = mpsc::channel(4);
        let eth = Uuid::new_v4();
        registry.register(eth, eth_tx);
        registry.set_wallet(&eth, interest(ETH_ADDR, Currency::Eth));

        let (btc_tx, mut btc_rx) = mpsc::channel(4);
        let btc = Uuid::new_v4();
        registry.register(btc, btc_tx);
        registry.set_wallet(&btc, interest(BTC_ADDR, Currency::Btc));

        // Full buffer: the broadcast must not block on it.
        let (full_tx, _full_rx) = mpsc::channel(1);
        let full = Uuid::new_v4();
        full_tx.try_send(Message::Ping(Vec::new().into())).unwrap();
        registry.register(full, full_tx);
        registry.set_wallet(&full, interest(ETH_ADDR, Currency::Eth));

        // No wallet yet: never matched.
        let (idle_tx, mut idle_rx) = mpsc::channel(4);
        registry.register(Uuid::new_v4(), idle_tx);

        let msg = ServerMessage::PriceUpdated { price: 2500.0 };
        let sent = registry
            .broadcast(&msg, |w| w.currency == Currency::Eth)
            .unwrap();

        assert_eq!(sent, 1);
        assert!(eth_rx.try_recv().is_ok());
        assert!(btc_rx.try_recv().is_err());
        assert!(idle_rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_closed_client() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(4);
        registry.register(id, tx);
        drop(rx);

        let msg = ServerMessage::BalanceUpdated { balance: 1.0 };
        assert!(!registry.send(&id, &msg).unwrap());
        assert!(!registry.send(&Uuid::new_v4(), &msg).unwrap());
    }
}

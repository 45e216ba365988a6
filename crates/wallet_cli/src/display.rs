//! Terminal rendering of the wallet state.

use common::{BalanceError, Currency, ServerMessage};

const BLOCKCYPHER_TOKENS_URL: &str = "https://accounts.blockcypher.com/tokens";

/// Latest price and balance received for the watched wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletView {
    address: String,
    currency: Option<Currency>,
    price: Option<f64>,
    balance: Option<f64>,
}

impl WalletView {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.trim().to_string(),
            currency: Currency::from_address(address),
            price: None,
            balance: None,
        }
    }

    pub fn header(&self) -> String {
        let currency = self
            .currency
            .map(|c| c.as_str().to_uppercase())
            .unwrap_or_else(|| "unknown currency".to_string());
        format!(
            "Watching {} ({})\nPress Enter to refresh the balance, q to quit.\n",
            self.address, currency
        )
    }

    /// Fold a server message into the view and return what to print.
    pub fn apply(&mut self, msg: ServerMessage) -> String {
        match msg {
            ServerMessage::PriceUpdated { price } => {
                self.price = Some(price);
                self.summary()
            }
            ServerMessage::BalanceUpdated { balance } => {
                self.balance = Some(balance);
                self.summary()
            }
            ServerMessage::Error(err) => render_error(&err),
        }
    }

    /// One status line: balance, price and USD value as far as known.
    pub fn summary(&self) -> String {
        let symbol = self
            .currency
            .map(|c| c.as_str().to_uppercase())
            .unwrap_or_else(|| "?".to_string());
        let balance = self
            .balance
            .map(|b| format!("{} {}", b, symbol))
            .unwrap_or_else(|| "loading...".to_string());
        let price = self
            .price
            .map(|p| format!("${:.2}", p))
            .unwrap_or_else(|| "loading...".to_string());
        let value = match (self.balance, self.price) {
            (Some(b), Some(p)) => format!("${:.2}", b * p),
            _ => "-".to_string(),
        };
        format!("Balance: {} | {}/USDT: {} | Value: {}\n", balance, symbol, price, value)
    }
}

/// Error block, with hints for not-found and rate-limited lookups.
pub fn render_error(err: &BalanceError) -> String {
    let mut out = format!("\nError: {}\n", err.error);
    if err.is_not_found {
        out.push_str(&format!(
            "   The wallet address \"{}\" was not found.\n   Please verify the address and try again.\n",
            err.address
        ));
    } else if err.is_rate_limit {
        out.push_str("   API rate limit reached for BlockCypher.\n");
        out.push_str("   Please wait a few minutes before trying again.\n");
        out.push_str("   Or upgrade your BlockCypher token for higher limits.\n");
        out.push_str(&format!("   Get your token at: {}\n", BLOCKCYPHER_TOKENS_URL));
    }
    out.push('\n');
    out
}

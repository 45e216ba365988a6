//! Balance lookup errors and their classification.

use common::BalanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The API has no record of the address (HTTP 404).
    #[error("Wallet address {address} not found")]
    NotFound { address: String },

    /// The API rejected the request for exceeding its rate limit (HTTP 429).
    #[error("{0}")]
    RateLimited(String),

    /// Any other non-success response.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }

    /// Metrics label for the failure class.
    pub fn outcome(&self) -> &'static str {
        if self.is_not_found() {
            "not_found"
        } else if self.is_rate_limit() {
            "rate_limited"
        } else {
            "error"
        }
    }

    /// The `balance-error` event reporting this failure for `address`.
    pub fn to_balance_error(&self, address: &str) -> BalanceError {
        BalanceError {
            address: address.to_string(),
            error: self.to_string(),
            is_not_found: self.is_not_found(),
            is_rate_limit: self.is_rate_limit(),
        }
    }
}

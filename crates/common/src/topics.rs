//! Broker topic names and key rules.
//!
//! Every topic carries JSON values and a routing key. The key is the field
//! the consumer fans out on (currency for prices, address for balances).

use crate::error::{Error, Result};
use std::fmt;

/// A broker topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Price ticks keyed by currency. Produced by the price worker.
    PriceUpdate,
    /// Balance lookup tasks keyed by address. Produced by the router.
    BalanceRequest,
    /// Balance lookup results keyed by address. Produced by the balance worker.
    BalanceResult,
    /// Balance lookup failures keyed by address. Produced by the balance worker.
    BalanceError,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::PriceUpdate,
        Topic::BalanceRequest,
        Topic::BalanceResult,
        Topic::BalanceError,
    ];

    /// Topic name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::PriceUpdate => "price-update",
            Topic::BalanceRequest => "balance-request",
            Topic::BalanceResult => "balance-result",
            Topic::BalanceError => "balance-error",
        }
    }

    /// Stream name backing this topic (`PRICE_UPDATE`, ...).
    pub fn stream_name(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }

    /// Subject a message with `key` is published on.
    pub fn subject(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{}.{}", self.as_str(), key))
    }

    /// Subject filter matching every key of this topic.
    pub fn filter_subject(&self) -> String {
        format!("{}.>", self.as_str())
    }

    /// Recover the message key from a subject produced by [`Topic::subject`].
    pub fn key_from_subject<'a>(&self, subject: &'a str) -> Option<&'a str> {
        subject
            .strip_prefix(self.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|key| !key.is_empty())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys become a single subject token, so they must not contain token
/// separators, wildcards or whitespace.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if invalid {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(Topic::PriceUpdate.stream_name(), "PRICE_UPDATE");
        assert_eq!(Topic::BalanceError.stream_name(), "BALANCE_ERROR");
    }

    #[test]
    fn test_subject_round_trip() {
        let subject = Topic::BalanceResult
            .subject("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
            .unwrap();
        assert_eq!(subject, "balance-result.1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert_eq!(
            Topic::BalanceResult.key_from_subject(&subject),
            Some("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
        );
        assert_eq!(Topic::PriceUpdate.key_from_subject(&subject), None);
        assert_eq!(Topic::PriceUpdate.key_from_subject("price-update."), None);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(Topic::PriceUpdate.subject("").is_err());
        assert!(Topic::PriceUpdate.subject("a.b").is_err());
        assert!(Topic::PriceUpdate.subject("*").is_err());
        assert!(Topic::PriceUpdate.subject("a b").is_err());
        assert!(Topic::PriceUpdate.subject("btc").is_ok());
    }
}

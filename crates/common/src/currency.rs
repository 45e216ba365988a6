//! Supported currencies and address classification.
//!
//! The set of currencies is closed: adding a chain means adding a variant
//! here and teaching [`Currency::from_address`] its address format.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_ALPHABET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// A currency the system can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Btc,
    Eth,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 2] = [Currency::Btc, Currency::Eth];

    /// Lowercase wire name, also used as the price-update message key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Btc => "btc",
            Currency::Eth => "eth",
        }
    }

    /// Number of decimals between the chain's base unit and one coin.
    pub fn decimals(&self) -> u32 {
        match self {
            Currency::Btc => 8,
            Currency::Eth => 18,
        }
    }

    /// Convert an integer amount of base units (satoshi, wei) to coins.
    ///
    /// Returns `None` if the amount does not fit a 96-bit decimal mantissa.
    pub fn from_base_units(&self, amount: u128) -> Option<Decimal> {
        let amount = i128::try_from(amount).ok()?;
        Decimal::try_from_i128_with_scale(amount, self.decimals())
            .ok()
            .map(|d| d.normalize())
    }

    /// Classify a wallet address by its format.
    ///
    /// - `0x` + 40 hex digits is an account-model (ETH) address.
    /// - Base58 addresses starting with `1` or `3` and bech32 addresses
    ///   starting with `bc1` are BTC addresses.
    ///
    /// Anything else is unsupported.
    pub fn from_address(address: &str) -> Option<Currency> {
        let address = address.trim();

        if is_eth_address(address) {
            Some(Currency::Eth)
        } else if is_btc_legacy_address(address) || is_btc_bech32_address(address) {
            Some(Currency::Btc)
        } else {
            None
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "btc" => Ok(Currency::Btc),
            "eth" => Ok(Currency::Eth),
            other => Err(crate::Error::UnknownCurrency(other.to_string())),
        }
    }
}

fn is_eth_address(address: &str) -> bool {
    let Some(hex) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_btc_legacy_address(address: &str) -> bool {
    (address.starts_with('1') || address.starts_with('3'))
        && (26..=35).contains(&address.len())
        && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn is_btc_bech32_address(address: &str) -> bool {
    // Mixed case is invalid bech32.
    let lower = address.to_ascii_lowercase();
    if address != lower && address != address.to_ascii_uppercase() {
        return false;
    }
    let Some(data) = lower.strip_prefix("bc1") else {
        return false;
    };
    (14..=74).contains(&data.len()) && data.chars().all(|c| BECH32_ALPHABET.contains(c))
}

//! Last-value caches for prices and balances.
//!
//! Only the most recent value per key is kept. Entries are never evicted
//! and live as long as the process.

use common::Currency;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Concurrent map holding the latest value seen for each key.
pub struct LastValueCache<K: Eq + Hash> {
    values: DashMap<K, f64>,
}

/// Latest price per currency.
pub type PriceCache = LastValueCache<Currency>;

/// Latest balance per wallet address, in coins.
pub type BalanceCache = LastValueCache<String>;

impl<K: Eq + Hash> Default for LastValueCache<K> {
    fn default() -> Self {
        Self {
            values: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash> LastValueCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value for `key`.
    pub fn set(&self, key: K, value: f64) {
        self.values.insert(key, value);
    }

    /// Latest value for `key`. A stored zero is still a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<f64>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.values.get(key).map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_value_wins() {
        let prices = PriceCache::new();
        assert_eq!(prices.get(&Currency::Btc), None);

        prices.set(Currency::Btc, 64000.0);
        prices.set(Currency::Btc, 64100.5);
        assert_eq!(prices.get(&Currency::Btc), Some(64100.5));
        assert_eq!(prices.get(&Currency::Eth), None);
    }

    #[test]
    fn test_zero_balance_is_cached() {
        let balances = BalanceCache::new();
        balances.set("0xabc".to_string(), 0.0);
        assert_eq!(balances.get("0xabc"), Some(0.0));
        assert_eq!(balances.get("0xdef"), None);
    }
}

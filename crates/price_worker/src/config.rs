//! Price worker configuration from the environment.

use crate::binance::{combined_stream_url, DEFAULT_WS_BASE_URL};
use common::error::{Error, Result};
use common::Currency;
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceWorkerConfig {
    pub nats_url: String,
    pub metrics_port: u16,
    /// Full combined-stream URL.
    pub stream_url: String,
}

impl Default for PriceWorkerConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            metrics_port: 9095,
            stream_url: combined_stream_url(DEFAULT_WS_BASE_URL, &Currency::ALL),
        }
    }
}

impl PriceWorkerConfig {
    /// Read `NATS_URL`, `METRICS_PORT` and `BINANCE_STREAM_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let metrics_port = match lookup("METRICS_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Generic(format!("METRICS_PORT must be a port, got '{}'", raw)))?,
            None => defaults.metrics_port,
        };
        Ok(Self {
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            metrics_port,
            stream_url: lookup("BINANCE_STREAM_URL").unwrap_or(defaults.stream_url),
        })
    }
}

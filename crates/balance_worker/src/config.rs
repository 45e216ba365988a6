//! Balance worker configuration from the environment.

use crate::blockcypher::{DEFAULT_API_URL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Shared group so that several workers split the requests between them.
pub const DEFAULT_CONSUMER_GROUP: &str = "balance-crawler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub nats_url: String,
    pub metrics_port: u16,
    pub api_url: String,
    /// Optional BlockCypher API token.
    pub api_token: Option<String>,
    pub consumer_group: String,
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            metrics_port: 9094,
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    /// Read `NATS_URL`, `METRICS_PORT`, `BLOCKCYPHER_API_URL`,
    /// `BLOCKCYPHER_TOKEN`, `BALANCE_CONSUMER_GROUP` and
    /// `BLOCKCYPHER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let metrics_port = match lookup("METRICS_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("METRICS_PORT must be a port, got '{}'", raw)))?,
            None => defaults.metrics_port,
        };
        let request_timeout = match lookup("BLOCKCYPHER_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map(Duration::from_secs).map_err(|_| {
                Error::Config(format!("BLOCKCYPHER_TIMEOUT_SECS must be a number, got '{}'", raw))
            })?,
            None => defaults.request_timeout,
        };

        Ok(Self {
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            metrics_port,
            api_url: lookup("BLOCKCYPHER_API_URL").unwrap_or(defaults.api_url),
            api_token: lookup("BLOCKCYPHER_TOKEN").filter(|t| !t.trim().is_empty()),
            consumer_group: lookup("BALANCE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            request_timeout,
        })
    }
}

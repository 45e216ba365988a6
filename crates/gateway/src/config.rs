//! Gateway configuration from the environment.

use crate::error::{GatewayError, Result};
use crate::router::DEFAULT_GROUP_PREFIX;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// NATS server URL.
    pub nats_url: String,
    /// WebSocket / health HTTP port.
    pub port: u16,
    /// Prometheus exporter port.
    pub metrics_port: u16,
    /// Prefix for this instance's consumer group names.
    pub group_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            port: 3000,
            metrics_port: 9093,
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Read `NATS_URL`, `PORT`, `METRICS_PORT` and `CONSUMER_GROUP_PREFIX`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            group_prefix: group_prefix(&lookup)?.unwrap_or(defaults.group_prefix),
        })
    }
}

/// Consumer names may not contain `.`, `*`, `>` or whitespace, so the
/// prefix is limited to ASCII letters, digits, `-` and `_`.
fn group_prefix(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<String>> {
    let Some(raw) = lookup("CONSUMER_GROUP_PREFIX") else {
        return Ok(None);
    };
    let valid = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(GatewayError::Config(format!(
            "CONSUMER_GROUP_PREFIX may only contain letters, digits, '-' and '_', got '{}'",
            raw
        )));
    }
    Ok(Some(raw))
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}

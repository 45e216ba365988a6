//! Binance combined ticker stream → `price-update` messages.
//!
//! Frames look like:
//!
//! ```json
//! {"stream":"btcusdt@ticker","data":{"e":"24hrTicker","s":"BTCUSDT","c":"61000.50", ...}}
//! ```
//!
//! `c` is the last traded price in USDT.

use async_trait::async_trait;
use common::error::{Error, Result};
use common::{Currency, PriceUpdate, Topic, WsHandler};
use metrics::counter;
use nats_client::Broker;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Binance spot WebSocket endpoint.
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443";

const TICKER_SUFFIX: &str = "usdt@ticker";

/// Combined-stream URL subscribing to the USDT ticker of each currency.
pub fn combined_stream_url(base_url: &str, currencies: &[Currency]) -> String {
    let streams: Vec<String> = currencies
        .iter()
        .map(|c| format!("{}{}", c.as_str(), TICKER_SUFFIX))
        .collect();
    format!(
        "{}/stream?streams={}",
        base_url.trim_end_matches('/'),
        streams.join("/")
    )
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: Option<String>,
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(rename = "c")]
    last_price: String,
}

/// A price read from one ticker frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub currency: Currency,
    pub price: f64,
}

/// Parse a combined-stream frame.
///
/// Returns `Ok(None)` for frames that carry no ticker (subscription acks)
/// and for symbols outside [`Currency`].
pub fn parse_ticker(msg: &str) -> Result<Option<Tick>> {
    let frame: CombinedFrame = serde_json::from_str(msg)?;
    let (Some(stream), Some(data)) = (frame.stream, frame.data) else {
        return Ok(None);
    };

    let Some(symbol) = stream.strip_suffix(TICKER_SUFFIX) else {
        return Ok(None);
    };
    let Ok(currency) = Currency::from_str(symbol) else {
        debug!("Skipping ticker for unsupported symbol '{}'", symbol);
        return Ok(None);
    };

    let price = Decimal::from_str(data.last_price.trim())
        .ok()
        .and_then(|d| d.to_f64())
        .ok_or_else(|| Error::Generic(format!("invalid price '{}' on {}", data.last_price, stream)))?;

    Ok(Some(Tick { currency, price }))
}

/// Publishes every ticker frame as a `price-update` keyed by currency.
pub struct BinanceTickerHandler {
    broker: Arc<dyn Broker>,
    url: String,
}

impl BinanceTickerHandler {
    pub fn new(broker: Arc<dyn Broker>, url: impl Into<String>) -> Self {
        Self {
            broker,
            url: url.into(),
        }
    }

    async fn publish(&self, tick: Tick) -> Result<()> {
        let payload = serde_json::to_vec(&PriceUpdate { price: tick.price })?;
        self.broker
            .publish(Topic::PriceUpdate, tick.currency.as_str(), payload.into())
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        counter!("price_worker_updates_total", "currency" => tick.currency.as_str()).increment(1);
        debug!("{} price {}", tick.currency, tick.price);
        Ok(())
    }
}

#[async_trait]
impl WsHandler for BinanceTickerHandler {
    fn url(&self) -> &str {
        &self.url
    }

    async fn on_message(&self, msg: &str) -> Result<()> {
        match parse_ticker(msg)? {
            Some(tick) => self.publish(tick).await,
            None => Ok(()),
        }
    }

    async fn on_disconnect(&self) {
        warn!("Binance ticker connection lost");
    }

    async fn on_reconnect(&self) {
        info!("Binance ticker connected");
    }
}

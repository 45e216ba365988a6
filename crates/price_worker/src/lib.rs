//! Price worker: relays Binance USDT tickers for the supported currencies
//! to the `price-update` topic, keyed by currency.

pub mod binance;
pub mod config;

pub use binance::{combined_stream_url, parse_ticker, BinanceTickerHandler, Tick};
pub use config::PriceWorkerConfig;

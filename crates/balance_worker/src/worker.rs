//! Balance request loop: `balance-request` → lookup → `balance-result` or
//! `balance-error`.

use crate::blockcypher::BalanceLookup;
use crate::error::Error;
use anyhow::{bail, Result};
use common::{BalanceRequest, BalanceResult, Currency, Topic};
use futures::StreamExt;
use metrics::counter;
use nats_client::{Broker, KeyedMessage};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumes balance requests from a shared consumer group and answers each
/// one with a result or an error keyed by the address.
pub struct BalanceWorker<L: BalanceLookup> {
    broker: Arc<dyn Broker>,
    lookup: L,
    group: String,
}

impl<L: BalanceLookup> BalanceWorker<L> {
    pub fn new(broker: Arc<dyn Broker>, lookup: L, group: impl Into<String>) -> Self {
        Self {
            broker,
            lookup,
            group: group.into(),
        }
    }

    /// Run until the shutdown channel fires or closes.
    ///
    /// A broker failure ends the loop with an error.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        for topic in [Topic::BalanceRequest, Topic::BalanceResult, Topic::BalanceError] {
            self.broker.ensure_topic(topic).await?;
        }
        let mut requests = self
            .broker
            .subscribe(Topic::BalanceRequest, &self.group)
            .await?;
        info!("Balance worker consuming '{}' as '{}'", Topic::BalanceRequest, self.group);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Balance worker received shutdown signal");
                    break;
                }

                msg = requests.next() => {
                    match msg {
                        Some(Ok(msg)) => self.handle_request(&msg).await?,
                        Some(Err(e)) => return Err(e.context("balance request stream failed")),
                        None => bail!("balance request stream ended unexpectedly"),
                    }
                }
            }
        }

        info!("Balance worker stopped");
        Ok(())
    }

    /// Answer one request. Only publish failures are returned; lookup
    /// failures become `balance-error` events and unusable requests are
    /// dropped.
    pub async fn handle_request(&self, msg: &KeyedMessage) -> Result<()> {
        let request: BalanceRequest = match serde_json::from_slice(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping unparsable balance request '{}': {}", msg.key, e);
                counter!("balance_worker_lookups_total", "outcome" => "dropped").increment(1);
                return Ok(());
            }
        };

        let address = if request.address.is_empty() {
            msg.key.as_str()
        } else {
            request.address.as_str()
        };
        if let Err(e) = common::topics::validate_key(address) {
            warn!("Dropping balance request with unusable address: {}", e);
            counter!("balance_worker_lookups_total", "outcome" => "dropped").increment(1);
            return Ok(());
        }

        match self.lookup_balance(&request.currency, address).await {
            Ok(balance) => {
                debug!("Balance of {} is {}", address, balance);
                self.publish(Topic::BalanceResult, address, &BalanceResult { balance })
                    .await?;
                counter!("balance_worker_lookups_total", "outcome" => "ok").increment(1);
            }
            Err(e) => {
                warn!("Error processing wallet balance for {}: {}", address, e);
                self.publish(Topic::BalanceError, address, &e.to_balance_error(address))
                    .await?;
                counter!("balance_worker_lookups_total", "outcome" => e.outcome()).increment(1);
            }
        }
        Ok(())
    }

    async fn lookup_balance(&self, currency: &str, address: &str) -> crate::Result<f64> {
        let currency: Currency = currency
            .parse()
            .map_err(|_| Error::UnsupportedCurrency(currency.to_string()))?;
        let balance = self.lookup.balance(currency, address).await?;
        balance
            .to_f64()
            .ok_or_else(|| Error::InvalidResponse(format!("balance {} is not representable", balance)))
    }

    async fn publish<T: Serialize>(&self, topic: Topic, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.broker.publish(topic, key, payload.into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use common::BalanceError;
    use nats_client::MemoryBroker;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use std::time::Duration;

    const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const ETH_ADDR: &str = "0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae";

    #[derive(Default)]
    struct FakeLookup {
        calls: Mutex<Vec<(Currency, String)>>,
    }

    #[async_trait]
    impl BalanceLookup for FakeLookup {
        async fn balance(&self, currency: Currency, address: &str) -> crate::Result<Decimal> {
            self.calls
                .lock()
                .unwrap()
                .push((currency, address.to_string()));
            match address {
                "1BoatSLRHtKNngkdXEeobR76b53LETtpyT" => Err(Error::NotFound {
                    address: address.to_string(),
                }),
                "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy" => {
                    Err(Error::RateLimited("Limits reached.".to_string()))
                }
                _ => Ok(Decimal::new(25, 1)),
            }
        }
    }

    fn worker() -> (BalanceWorker<FakeLookup>, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::with_all_topics());
        let worker = BalanceWorker::new(broker.clone(), FakeLookup::default(), "balance-crawler");
        (worker, broker)
    }

    fn request(address: &str, currency: &str) -> KeyedMessage {
        let payload = serde_json::to_vec(&BalanceRequest {
            address: address.to_string(),
            currency: currency.to_string(),
        })
        .unwrap();
        KeyedMessage::new(address, payload)
    }

    fn errors(broker: &MemoryBroker) -> Vec<BalanceError> {
        broker
            .published(Topic::BalanceError)
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_publishes_result_keyed_by_address() {
        let (worker, broker) = worker();

        worker.handle_request(&request(ETH_ADDR, "eth")).await.unwrap();

        let results = broker.published(Topic::BalanceResult);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, ETH_ADDR);
        let result: BalanceResult = serde_json::from_slice(&results[0].payload).unwrap();
        assert_eq!(result.balance, 2.5);
        assert_eq!(
            *worker.lookup.calls.lock().unwrap(),
            vec![(Currency::Eth, ETH_ADDR.to_string())]
        );
    }

    #[tokio::test]
    async fn test_not_found_and_rate_limit() {
        let (worker, broker) = worker();

        worker
            .handle_request(&request("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", "btc"))
            .await
            .unwrap();
        worker
            .handle_request(&request("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", "btc"))
            .await
            .unwrap();

        let errors = errors(&broker);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].is_not_found);
        assert_eq!(
            errors[0].error,
            "Wallet address 1BoatSLRHtKNngkdXEeobR76b53LETtpyT not found"
        );
        assert!(errors[1].is_rate_limit);
        assert!(!errors[1].is_not_found);
        assert!(broker.published(Topic::BalanceResult).is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_currency_is_generic_error() {
        let (worker, broker) = worker();

        worker.handle_request(&request(BTC_ADDR, "doge")).await.unwrap();

        assert_eq!(
            errors(&broker),
            vec![BalanceError::generic(BTC_ADDR, "Unsupported currency: doge")]
        );
        assert!(worker.lookup.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_request_is_dropped() {
        let (worker, broker) = worker();

        worker
            .handle_request(&KeyedMessage::new(BTC_ADDR, Bytes::from_static(b"{oops")))
            .await
            .unwrap();
        worker
            .handle_request(&KeyedMessage::new("", Bytes::from_static(br#"{"address":"","currency":"btc"}"#)))
            .await
            .unwrap();

        assert!(broker.published(Topic::BalanceResult).is_empty());
        assert!(broker.published(Topic::BalanceError).is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let (worker, broker) = worker();
        broker.fail_publishes(true);
        assert!(worker.handle_request(&request(ETH_ADDR, "eth")).await.is_err());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let (worker, broker) = worker();
        let worker = Arc::new(worker);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let running = worker.clone();
        let handle = tokio::spawn(async move { running.run(shutdown_rx).await });

        // Wait for the group to be joined before publishing.
        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.active_groups(Topic::BalanceRequest).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let msg = request(BTC_ADDR, "btc");
        broker
            .publish(Topic::BalanceRequest, &msg.key, msg.payload)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.published(Topic::BalanceResult).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_fails_on_stream_error() {
        let (worker, broker) = worker();
        let worker = Arc::new(worker);
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let running = worker.clone();
        let handle = tokio::spawn(async move { running.run(shutdown_rx).await });

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.active_groups(Topic::BalanceRequest).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        broker.fail_topic(Topic::BalanceRequest, "connection reset");

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }
}

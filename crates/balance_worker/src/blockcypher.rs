//! BlockCypher REST API client.

use crate::error::{Error, Result};
use async_trait::async_trait;
use common::Currency;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Base URL for the BlockCypher API.
pub const DEFAULT_API_URL: &str = "https://api.blockcypher.com/v1";

/// Default timeout for one balance lookup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves the confirmed balance of a wallet.
#[async_trait]
pub trait BalanceLookup: Send + Sync {
    /// Balance of `address` in whole coins.
    async fn balance(&self, currency: Currency, address: &str) -> Result<Decimal>;
}

/// `GET /{currency}/main/addrs/{address}/balance` response. Only the
/// confirmed balance in base units is used.
#[derive(Debug, Deserialize)]
struct AddressBalance {
    balance: u128,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
}

/// BlockCypher REST API client.
#[derive(Debug, Clone)]
pub struct BlockCypherClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BlockCypherClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn balance_url(&self, currency: Currency, address: &str) -> String {
        format!("{}/{}/main/addrs/{}/balance", self.base_url, currency, address)
    }
}

#[async_trait]
impl BalanceLookup for BlockCypherClient {
    async fn balance(&self, currency: Currency, address: &str) -> Result<Decimal> {
        let url = self.balance_url(currency, address);
        debug!("Fetching balance from: {}", url);

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, address, &body));
        }

        let body: AddressBalance = response.json().await?;
        currency.from_base_units(body.balance).ok_or_else(|| {
            Error::InvalidResponse(format!("balance {} out of range", body.balance))
        })
    }
}

/// Map a non-success response to an error. The message comes from the
/// body's `error` field when there is one.
fn classify(status: StatusCode, address: &str, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));

    match status {
        StatusCode::NOT_FOUND => Error::NotFound {
            address: address.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(message),
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{header, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const ETH_ADDR: &str = "0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae";

    async fn balance_handler(
        Path((currency, address)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        match (currency.as_str(), address.as_str()) {
            (_, "missing") => (
                AxumStatus::NOT_FOUND,
                Json(json!({"error": "Address not found"})),
            )
                .into_response(),
            (_, "busy") => (
                AxumStatus::TOO_MANY_REQUESTS,
                Json(json!({"error": "Limits reached."})),
            )
                .into_response(),
            (_, "broken") => (AxumStatus::INTERNAL_SERVER_ERROR, "oops").into_response(),
            (_, "private") if query.get("token").map(String::as_str) != Some("secret") => (
                AxumStatus::UNAUTHORIZED,
                Json(json!({"error": "Missing token"})),
            )
                .into_response(),
            ("btc", _) | (_, "private") => Json(json!({"balance": 150_000_000u64})).into_response(),
            // 25 ETH in wei does not fit a u64.
            _ => (
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"balance": 25000000000000000000, "final_balance": 25000000000000000000}"#,
            )
                .into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route(
            "/{currency}/main/addrs/{address}/balance",
            get(balance_handler),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: &str, token: Option<&str>) -> BlockCypherClient {
        BlockCypherClient::new(base_url, token.map(str::to_string), DEFAULT_TIMEOUT).unwrap()
    }

    #[test]
    fn test_balance_url() {
        let client = client("https://api.blockcypher.com/v1/", None);
        assert_eq!(
            client.balance_url(Currency::Eth, ETH_ADDR),
            format!("https://api.blockcypher.com/v1/eth/main/addrs/{}/balance", ETH_ADDR)
        );
    }

    #[test]
    fn test_classify() {
        let err = classify(StatusCode::NOT_FOUND, "0xabc", r#"{"error":"nope"}"#);
        assert_eq!(err.to_string(), "Wallet address 0xabc not found");
        assert!(err.is_not_found());

        let err = classify(StatusCode::TOO_MANY_REQUESTS, "0xabc", "");
        assert!(err.is_rate_limit());
        assert_eq!(err.to_string(), "Request failed with status code 429");

        let err = classify(StatusCode::BAD_GATEWAY, "0xabc", r#"{"error":"upstream down"}"#);
        assert_eq!(err.to_string(), "upstream down");
        assert_eq!(err.outcome(), "error");
    }

    #[tokio::test]
    async fn test_converts_base_units() {
        let base_url = serve().await;
        let client = client(&base_url, None);

        let btc = client.balance(Currency::Btc, BTC_ADDR).await.unwrap();
        assert_eq!(btc.to_string(), "1.5");

        let eth = client.balance(Currency::Eth, ETH_ADDR).await.unwrap();
        assert_eq!(eth.to_string(), "25");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let base_url = serve().await;
        let client = client(&base_url, None);

        let err = client.balance(Currency::Eth, "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Wallet address missing not found");

        let err = client.balance(Currency::Eth, "busy").await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.to_string(), "Limits reached.");

        let err = client.balance(Currency::Btc, "broken").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(err.to_string(), "Request failed with status code 500");
    }

    #[tokio::test]
    async fn test_token_is_sent() {
        let base_url = serve().await;

        let err = client(&base_url, None)
            .balance(Currency::Btc, "private")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing token");

        let balance = client(&base_url, Some("secret"))
            .balance(Currency::Btc, "private")
            .await
            .unwrap();
        assert_eq!(balance.to_string(), "1.5");
    }

    #[tokio::test]
    async fn test_transport_failure_is_generic() {
        // Nothing listens on port 9 of localhost.
        let err = client("http://127.0.0.1:9", None)
            .balance(Currency::Btc, BTC_ADDR)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert_eq!(err.outcome(), "error");
    }
}

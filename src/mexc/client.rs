use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use tokio::sync::Semaphore;

use crate::models::OrderType;

use super::types::{AccountInfo, AssetBalance, OrderBookDepth, OrderRequest, OrderResponse, Ticker};
use super::{Exchange, ExchangeError};

type HmacSha256 = Hmac<Sha256>;

/// MEXC error code for "order does not exist".
const ORDER_NOT_FOUND_CODE: &str = "-2013";

/// REST client for the MEXC spot API with HMAC-SHA256 request signing.
///
/// In-flight requests are bounded by a semaphore; every call carries a
/// timeout. Reads retry once on a transport error, order placement never
/// does.
#[derive(Clone)]
pub struct MexcClient {
    http: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl MexcClient {
    pub fn new(
        base_url: String,
        api_key: String,
        secret_key: String,
        max_in_flight: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().pool_max_idle_per_host(10).build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            secret_key,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            timeout,
        })
    }

    fn sign(&self, query_string: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Query string in sorted key order. MEXC verifies the signature
    /// against the exact byte sequence.
    fn build_query_string(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_url(
        &self,
        path: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<String, ExchangeError> {
        params.insert(
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        let query_string = Self::build_query_string(&params);
        let signature = self.sign(&query_string)?;
        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ExchangeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("exchange client semaphore closed");

        match tokio::time::timeout(self.timeout, req.send()).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(ExchangeError::Http(e)),
            Err(_) => Err(ExchangeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ExchangeError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(ExchangeError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Unsigned GET against a public market-data endpoint, retried once on
    /// a transport-level failure.
    async fn get_public(&self, path_and_query: &str) -> Result<reqwest::Response, ExchangeError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        match self.send(self.http.get(&url)).await {
            Ok(resp) => Self::check(resp).await,
            Err(first) => {
                tracing::debug!(error = %first, url = %url, "Public read failed, retrying once");
                let resp = self.send(self.http.get(&url)).await?;
                Self::check(resp).await
            }
        }
    }
}

#[async_trait]
impl Exchange for MexcClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let resp = self
            .get_public(&format!("/api/v3/ticker/price?symbol={symbol}"))
            .await?;
        let ticker: Ticker = resp.json().await?;
        Ok(ticker.price)
    }

    async fn order_book_depth(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<OrderBookDepth, ExchangeError> {
        let resp = self
            .get_public(&format!("/api/v3/depth?symbol={symbol}&limit={limit}"))
            .await?;
        let depth: OrderBookDepth = resp.json().await?;
        Ok(depth)
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderResponse, ExchangeError> {
        // Limit orders go out immediate-or-cancel so no resting remainder
        // can outlive a crashed attempt.
        let order_type = match req.order_type {
            OrderType::Limit => "IMMEDIATE_OR_CANCEL".to_string(),
            other => other.to_string(),
        };

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), req.symbol.clone());
        params.insert("side".to_string(), req.side.to_string());
        params.insert("type".to_string(), order_type);
        params.insert("newClientOrderId".to_string(), req.client_order_id.clone());

        if let Some(qty) = req.quantity {
            params.insert("quantity".to_string(), qty.to_string());
        }
        if let Some(quote) = req.quote_order_qty {
            params.insert("quoteOrderQty".to_string(), quote.to_string());
        }
        if let Some(price) = req.price {
            params.insert("price".to_string(), price.to_string());
        }

        let url = self.signed_url("/api/v3/order", params)?;
        let resp = self
            .send(self.http.post(&url).header("X-MEXC-APIKEY", &self.api_key))
            .await?;
        let resp = Self::check(resp).await?;

        let order: OrderResponse = resp.json().await?;
        Ok(order)
    }

    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>, ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("origClientOrderId".to_string(), client_order_id.to_string());

        let url = self.signed_url("/api/v3/order", params)?;
        let resp = self
            .send(self.http.get(&url).header("X-MEXC-APIKEY", &self.api_key))
            .await?;

        let status = resp.status();
        if status.is_success() {
            let order: OrderResponse = resp.json().await?;
            return Ok(Some(order));
        }

        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 404 || body.contains(ORDER_NOT_FOUND_CODE) {
            return Ok(None);
        }

        Err(ExchangeError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(), ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("origClientOrderId".to_string(), client_order_id.to_string());

        let url = self.signed_url("/api/v3/order", params)?;
        let resp = self
            .send(
                self.http
                    .delete(&url)
                    .header("X-MEXC-APIKEY", &self.api_key),
            )
            .await?;
        Self::check(resp).await?;

        Ok(())
    }

    async fn account_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        let url = self.signed_url("/api/v3/account", BTreeMap::new())?;
        let resp = self
            .send(self.http.get(&url).header("X-MEXC-APIKEY", &self.api_key))
            .await?;
        let resp = Self::check(resp).await?;

        let account: AccountInfo = resp.json().await?;
        Ok(account.balances)
    }
}

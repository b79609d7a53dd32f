pub mod client;
pub mod types;

pub use client::MexcClient;
pub use types::{AccountInfo, AssetBalance, OrderBookDepth, OrderRequest, OrderResponse, Ticker};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("request signing failed: {0}")]
    Signing(String),
}

/// Narrow interface to the exchange consumed by the kernel. Read
/// operations are safe to retry. `place_order` is never retried here;
/// retry policy belongs to the execution engine, which derives a fresh
/// idempotency consideration per attempt.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn order_book_depth(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<OrderBookDepth, ExchangeError>;

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderResponse, ExchangeError>;

    /// Look up an order by the client order id we submitted it under.
    /// `Ok(None)` means the exchange has no record of it: the attempt
    /// never reached the matching engine.
    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>, ExchangeError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(), ExchangeError>;

    async fn account_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError>;
}

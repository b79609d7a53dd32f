use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderType, Side};

/// Order submission parameters. Exactly one of `quantity` /
/// `quote_order_qty` is set: market snipes buy by quote amount, exits and
/// limit orders specify base quantity.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub quote_order_qty: Option<Decimal>,
    pub price: Option<Decimal>,
    pub client_order_id: String,
}

/// Response from order placement and order status queries
/// (POST/GET /api/v3/order).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(deserialize_with = "de_string_or_number")]
    pub order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: Option<String>,
    pub status: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub orig_qty: Option<Decimal>,
    #[serde(default)]
    pub executed_qty: Option<Decimal>,
    #[serde(rename = "cummulativeQuoteQty", default)]
    pub cumulative_quote_qty: Option<Decimal>,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
            || self
                .executed_qty
                .map(|q| q > Decimal::ZERO)
                .unwrap_or(false)
    }

    /// Average fill price: cumulative quote / executed base when both are
    /// reported, else the order's nominal price.
    pub fn fill_price(&self) -> Option<Decimal> {
        match (self.cumulative_quote_qty, self.executed_qty) {
            (Some(quote), Some(qty)) if !qty.is_zero() => Some(quote / qty),
            _ => self.price.filter(|p| !p.is_zero()),
        }
    }
}

/// GET /api/v3/ticker/price
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
}

/// One price level of the order book: [price, quantity].
#[derive(Debug, Clone, Deserialize)]
pub struct DepthLevel(pub Decimal, pub Decimal);

/// GET /api/v3/depth
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// GET /api/v3/account
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

// MEXC returns order ids as numbers on some endpoints and strings on
// others; accept both.
fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_price_from_cumulative_quote() {
        let resp = OrderResponse {
            order_id: "1".into(),
            symbol: "BTCUSDT".into(),
            client_order_id: None,
            side: "BUY".into(),
            order_type: Some("MARKET".into()),
            status: "FILLED".into(),
            price: None,
            orig_qty: None,
            executed_qty: Some(Decimal::new(2, 3)), // 0.002
            cumulative_quote_qty: Some(Decimal::from(100)),
        };
        assert_eq!(resp.fill_price(), Some(Decimal::from(50_000)));
        assert!(resp.is_filled());
    }

    #[test]
    fn test_order_id_accepts_number() {
        let json = r#"{"orderId": 12345, "symbol": "XYZUSDT", "side": "BUY", "status": "NEW"}"#;
        let resp: OrderResponse = serde_json::from_str(json).expect("should parse");
        assert_eq!(resp.order_id, "12345");
        assert!(!resp.is_filled());
    }

    #[test]
    fn test_depth_parses_string_levels() {
        let json = r#"{"bids": [["49999.5", "1.2"]], "asks": [["50000.5", "0.8"]]}"#;
        let depth: OrderBookDepth = serde_json::from_str(json).expect("should parse");
        assert_eq!(depth.bids[0].0, "49999.5".parse::<Decimal>().unwrap());
        assert_eq!(depth.asks[0].1, "0.8".parse::<Decimal>().unwrap());
    }
}

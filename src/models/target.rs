use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Side, TargetStatus};

/// Database row for the snipe_targets table: a planned trade entry
/// awaiting its execution window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnipeTarget {
    pub id: i64,
    pub user_id: String,
    pub symbol: String,
    pub vcoin_id: String,
    pub side: String,
    /// Position size in quote currency units (USDT).
    pub position_size_quote: Decimal,
    /// Stop-loss distance from entry, in percent (5 = 5%).
    pub stop_loss_pct: Decimal,
    /// Take-profit level selector, 1-4. Overridden by custom_take_profit_pct.
    pub take_profit_level: i32,
    pub custom_take_profit_pct: Option<Decimal>,
    /// Optional limit entry price. None = market entry.
    pub entry_price: Option<Decimal>,
    /// Nominal execution timestamp. None = execute as soon as eligible.
    pub execution_time: Option<DateTime<Utc>>,
    /// Lower number = higher priority.
    pub priority: i32,
    pub confidence: Decimal,
    pub risk_tier: String,
    pub status: String,
    pub current_retries: i32,
    pub max_retries: i32,
    /// Earliest time the next retry may run (exponential backoff).
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub actual_execution_time: Option<DateTime<Utc>>,
    pub execution_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub execution_status: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SnipeTarget {
    pub fn status(&self) -> Option<TargetStatus> {
        TargetStatus::parse(&self.status)
    }

    pub fn order_side(&self) -> Side {
        Side::from_api_str(&self.side).unwrap_or(Side::Buy)
    }

    /// Effective take-profit percent: the custom override when present,
    /// otherwise the preset mapped from the level selector
    /// (1 = 5%, 2 = 10%, 3 = 15%, 4 = 25%).
    pub fn take_profit_pct(&self) -> Decimal {
        if let Some(custom) = self.custom_take_profit_pct {
            return custom;
        }
        match self.take_profit_level {
            1 => Decimal::from(5),
            2 => Decimal::from(10),
            3 => Decimal::from(15),
            4 => Decimal::from(25),
            _ => Decimal::from(10),
        }
    }

    pub fn retries_remaining(&self) -> bool {
        self.current_retries < self.max_retries
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::PositionSide;

/// Database row for the positions table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub target_id: Option<i64>,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub status: String,
    pub exit_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Fields for opening a new position; the store assigns id and opened_at.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub target_id: Option<i64>,
    pub user_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss_pct: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
}

impl Position {
    pub fn position_side(&self) -> PositionSide {
        PositionSide::parse(&self.side).unwrap_or(PositionSide::Long)
    }

    /// PnL at the given price, sign-adjusted for direction:
    /// long profits when price rises, short when it falls.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let diff = match self.position_side() {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        };
        diff * self.quantity
    }

    pub fn pnl_pct_at(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let diff = match self.position_side() {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        };
        diff / self.entry_price * Decimal::from(100)
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status.as_str(),
            super::position_status::OPEN | super::position_status::PARTIALLY_FILLED
        )
    }
}

/// Stop-loss price for a position entered at `entry`: below entry for a
/// long, above for a short.
pub fn stop_loss_price(side: PositionSide, entry: Decimal, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::from(100);
    match side {
        PositionSide::Long => entry - offset,
        PositionSide::Short => entry + offset,
    }
}

/// Take-profit price for a position entered at `entry`: above entry for a
/// long, below for a short.
pub fn take_profit_price(side: PositionSide, entry: Decimal, pct: Decimal) -> Decimal {
    let offset = entry * pct / Decimal::from(100);
    match side {
        PositionSide::Long => entry + offset,
        PositionSide::Short => entry - offset,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Side;

/// Database row for the transaction_locks table: a short-lived exclusive
/// claim on a trading resource. At most one `active` lock per resource key
/// exists at any time; a lock past its expiry is treated as released.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionLock {
    pub id: Uuid,
    pub resource_key: String,
    pub idempotency_key: String,
    pub status: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lock status constants.
pub mod lock_status {
    pub const ACTIVE: &str = "active";
    pub const RELEASED: &str = "released";
    pub const EXPIRED: &str = "expired";
    pub const FAILED: &str = "failed";
}

/// Resource key guarding entry execution for a symbol/side pair.
pub fn trade_lock_key(symbol: &str, side: Side) -> String {
    format!("trade:{symbol}:{side}")
}

/// Resource key guarding closure of a single position.
pub fn close_lock_key(position_id: Uuid) -> String {
    format!("close:{position_id}")
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only audit row for the execution_history table. Every order
/// attempt produces a `submitted` row before the exchange call and a
/// terminal `filled`/`failed` row after; rows are never updated. The
/// latest row for a target being `submitted` means the attempt's outcome
/// was never recorded and the engine must reconcile against the exchange
/// before submitting again.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub target_id: Option<i64>,
    pub position_id: Option<Uuid>,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub attempt: i32,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: String,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for appending a history row; the store assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewExecutionRecord {
    pub target_id: Option<i64>,
    pub position_id: Option<Uuid>,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub attempt: i32,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: String,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub error_message: Option<String>,
}

/// Execution history status constants.
pub mod execution_status {
    pub const SUBMITTED: &str = "submitted";
    pub const FILLED: &str = "filled";
    pub const FAILED: &str = "failed";
}

/// Deterministic client order id for an entry attempt. The exchange echoes
/// this back, which is what makes crash reconciliation possible.
pub fn entry_client_order_id(target_id: i64, attempt: i32) -> String {
    format!("snipe-{target_id}-{attempt}")
}

/// Client order id for a position-closing order.
pub fn close_client_order_id(position_id: Uuid, now: DateTime<Utc>) -> String {
    format!("close-{position_id}-{}", now.timestamp_millis())
}

pub mod execution_repo;
pub mod lock_repo;
pub mod position_repo;
pub mod target_repo;

pub use execution_repo::PgExecutionLog;
pub use lock_repo::PgLockStore;
pub use position_repo::PgPositionStore;
pub use target_repo::PgTargetStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::execution::NewExecutionRecord;
use crate::models::{ExecutionRecord, NewPosition, Position, SnipeTarget, TargetStatus};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity before any loop is spawned
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The conditional update did not apply because the current status
    /// did not match. Benign: another worker got there first.
    #[error("conflict: concurrent status change")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome fields applied together with a status transition.
#[derive(Debug, Default, Clone)]
pub struct TargetUpdate {
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub actual_execution_time: Option<DateTime<Utc>>,
    pub execution_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub execution_status: Option<String>,
    pub error_message: Option<String>,
}

/// Durable queue of snipe targets. The compare-and-swap `transition` is
/// the sole mechanism preventing two workers from double-executing a
/// target; dispatch ordering is best-effort only.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Targets eligible for dispatch: `ready` whose execution time is null
    /// or within `now + lookahead`, or `pending` whose time has arrived,
    /// excluding targets still inside their retry backoff, ordered by
    /// (priority ascending, execution time ascending). Read-only.
    async fn fetch_eligible(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<SnipeTarget>, StoreError>;

    async fn get(&self, id: i64) -> Result<SnipeTarget, StoreError>;

    /// Conditional status update. When `from` is supplied and the current
    /// status differs, nothing is written and `Conflict` is returned.
    async fn transition(
        &self,
        id: i64,
        from: Option<TargetStatus>,
        to: TargetStatus,
        update: TargetUpdate,
    ) -> Result<(), StoreError>;

    /// Increment the retry counter, capped at max_retries. Returns the new
    /// count, or `Conflict` once the budget is exhausted.
    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError>;

    /// Targets sitting in `executing` since before `cutoff`, candidates
    /// for watchdog reclamation.
    async fn fetch_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<SnipeTarget>, StoreError>;

    /// Recent targets for the operator API, optionally filtered by status.
    async fn list(
        &self,
        status: Option<TargetStatus>,
        limit: i64,
    ) -> Result<Vec<SnipeTarget>, StoreError>;
}

/// Durable record of open/closed positions.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert(&self, new: NewPosition) -> Result<Position, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Position, StoreError>;

    /// Position originated by a target, if any. Used when recovering a
    /// fill whose persistence was interrupted.
    async fn find_by_target(&self, target_id: i64) -> Result<Option<Position>, StoreError>;

    async fn open_positions(&self) -> Result<Vec<Position>, StoreError>;

    async fn count_open(&self) -> Result<i64, StoreError>;

    async fn all_positions(&self, limit: i64) -> Result<Vec<Position>, StoreError>;

    async fn update_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Result<(), StoreError>;

    /// Replace the stop-loss watch. Applies only while the position is
    /// open; `Conflict` otherwise.
    async fn set_stop_loss(&self, id: Uuid, pct: Decimal, price: Decimal)
        -> Result<(), StoreError>;

    /// Replace the take-profit watch. Applies only while the position is
    /// open; `Conflict` otherwise.
    async fn set_take_profit(
        &self,
        id: Uuid,
        pct: Decimal,
        price: Decimal,
    ) -> Result<(), StoreError>;

    /// Close the position (compare-and-swap on open status), recording the
    /// realized PnL and exit reason. Both threshold watches die with the
    /// close since only open positions are swept.
    async fn close(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only execution audit log.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn record(&self, rec: NewExecutionRecord) -> Result<ExecutionRecord, StoreError>;

    /// Most recent history row for a target, used for crash reconciliation.
    async fn latest_for_target(&self, target_id: i64)
        -> Result<Option<ExecutionRecord>, StoreError>;

    async fn list_for_target(&self, target_id: i64) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Short-lived exclusive claims keyed by trading resource. The only
/// cross-row mutual-exclusion primitive in the kernel.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to acquire the lock. Returns false when another holder has an
    /// unexpired active claim on the resource key.
    async fn acquire(
        &self,
        resource_key: &str,
        idempotency_key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release(&self, resource_key: &str, idempotency_key: &str) -> Result<(), StoreError>;

    /// Mark active locks past their expiry as expired. Returns how many
    /// were reclaimed.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

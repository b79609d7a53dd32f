use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewPosition, Position};

use super::{PositionStore, StoreError};

#[derive(Clone)]
pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn insert(&self, new: NewPosition) -> Result<Position, StoreError> {
        let pos = sqlx::query_as::<_, Position>(
            r#"
            INSERT INTO positions
                (target_id, user_id, symbol, side, entry_price, quantity,
                 stop_loss_pct, stop_loss_price, take_profit_pct, take_profit_price)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(new.target_id)
        .bind(&new.user_id)
        .bind(&new.symbol)
        .bind(new.side.to_string())
        .bind(new.entry_price)
        .bind(new.quantity)
        .bind(new.stop_loss_pct)
        .bind(new.stop_loss_price)
        .bind(new.take_profit_pct)
        .bind(new.take_profit_price)
        .fetch_one(&self.pool)
        .await?;

        Ok(pos)
    }

    async fn get(&self, id: Uuid) -> Result<Position, StoreError> {
        sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_target(&self, target_id: i64) -> Result<Option<Position>, StoreError> {
        let pos = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE target_id = $1 ORDER BY opened_at DESC LIMIT 1",
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pos)
    }

    async fn open_positions(&self) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT * FROM positions
            WHERE status IN ('open', 'partially_filled')
            ORDER BY opened_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(positions)
    }

    async fn count_open(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM positions WHERE status IN ('open', 'partially_filled')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn all_positions(&self, limit: i64) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions ORDER BY opened_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(positions)
    }

    async fn update_price(
        &self,
        id: Uuid,
        current_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE positions SET current_price = $2, unrealized_pnl = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(current_price)
        .bind(unrealized_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_stop_loss(
        &self,
        id: Uuid,
        pct: Decimal,
        price: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE positions SET stop_loss_pct = $2, stop_loss_price = $3
            WHERE id = $1 AND status IN ('open', 'partially_filled')
            "#,
        )
        .bind(id)
        .bind(pct)
        .bind(price)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn set_take_profit(
        &self,
        id: Uuid,
        pct: Decimal,
        price: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE positions SET take_profit_pct = $2, take_profit_price = $3
            WHERE id = $1 AND status IN ('open', 'partially_filled')
            "#,
        )
        .bind(id)
        .bind(pct)
        .bind(price)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn close(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'closed',
                current_price = $2,
                realized_pnl = $3,
                exit_reason = $4,
                closed_at = $5
            WHERE id = $1 AND status IN ('open', 'partially_filled')
            "#,
        )
        .bind(id)
        .bind(exit_price)
        .bind(realized_pnl)
        .bind(reason)
        .bind(closed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }
}

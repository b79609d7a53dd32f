use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::execution::NewExecutionRecord;
use crate::models::ExecutionRecord;

use super::{ExecutionLog, StoreError};

#[derive(Clone)]
pub struct PgExecutionLog {
    pool: PgPool,
}

impl PgExecutionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLog for PgExecutionLog {
    async fn record(&self, rec: NewExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            INSERT INTO execution_history
                (target_id, position_id, user_id, symbol, side, attempt,
                 client_order_id, exchange_order_id, status, quantity, price,
                 quote_amount, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(rec.target_id)
        .bind(rec.position_id)
        .bind(&rec.user_id)
        .bind(&rec.symbol)
        .bind(&rec.side)
        .bind(rec.attempt)
        .bind(&rec.client_order_id)
        .bind(&rec.exchange_order_id)
        .bind(&rec.status)
        .bind(rec.quantity)
        .bind(rec.price)
        .bind(rec.quote_amount)
        .bind(&rec.error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn latest_for_target(
        &self,
        target_id: i64,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            SELECT * FROM execution_history
            WHERE target_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_for_target(&self, target_id: i64) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM execution_history WHERE target_id = $1 ORDER BY created_at ASC",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

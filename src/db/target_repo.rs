use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{SnipeTarget, TargetStatus};

use super::{StoreError, TargetStore, TargetUpdate};

#[derive(Clone)]
pub struct PgTargetStore {
    pool: PgPool,
}

impl PgTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn fetch_eligible(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lookahead: chrono::Duration,
    ) -> Result<Vec<SnipeTarget>, StoreError> {
        let cutoff = now + lookahead;
        let targets = sqlx::query_as::<_, SnipeTarget>(
            r#"
            SELECT * FROM snipe_targets
            WHERE ((status = 'ready' AND (execution_time IS NULL OR execution_time <= $2))
                OR (status = 'pending' AND execution_time IS NOT NULL AND execution_time <= $2))
              AND (next_attempt_at IS NULL OR next_attempt_at <= $3)
            ORDER BY priority ASC, execution_time ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }

    async fn get(&self, id: i64) -> Result<SnipeTarget, StoreError> {
        sqlx::query_as::<_, SnipeTarget>("SELECT * FROM snipe_targets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn transition(
        &self,
        id: i64,
        from: Option<TargetStatus>,
        to: TargetStatus,
        update: TargetUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE snipe_targets
            SET status = $2,
                next_attempt_at = COALESCE($3, next_attempt_at),
                actual_execution_time = COALESCE($4, actual_execution_time),
                execution_price = COALESCE($5, execution_price),
                executed_quantity = COALESCE($6, executed_quantity),
                execution_status = COALESCE($7, execution_status),
                error_message = COALESCE($8, error_message),
                updated_at = NOW()
            WHERE id = $1 AND ($9::text IS NULL OR status = $9)
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(update.next_attempt_at)
        .bind(update.actual_execution_time)
        .bind(update.execution_price)
        .bind(update.executed_quantity)
        .bind(update.execution_status)
        .bind(update.error_message)
        .bind(from.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Distinguish a missing row from a status mismatch
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM snipe_targets WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        if exists.0 {
            Err(StoreError::Conflict)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn increment_retry(&self, id: i64) -> Result<i32, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE snipe_targets
            SET current_retries = current_retries + 1, updated_at = NOW()
            WHERE id = $1 AND current_retries < max_retries
            RETURNING current_retries
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((count,)) => Ok(count),
            None => {
                let exists: (bool,) =
                    sqlx::query_as("SELECT EXISTS(SELECT 1 FROM snipe_targets WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await?;
                if exists.0 {
                    Err(StoreError::Conflict)
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }

    async fn fetch_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<SnipeTarget>, StoreError> {
        let targets = sqlx::query_as::<_, SnipeTarget>(
            "SELECT * FROM snipe_targets WHERE status = 'executing' AND updated_at <= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }

    async fn list(
        &self,
        status: Option<TargetStatus>,
        limit: i64,
    ) -> Result<Vec<SnipeTarget>, StoreError> {
        let targets = sqlx::query_as::<_, SnipeTarget>(
            r#"
            SELECT * FROM snipe_targets
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }
}

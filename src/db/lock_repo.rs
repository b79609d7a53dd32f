use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::{LockStore, StoreError};

/// Lock store backed by the transaction_locks table. Exclusivity comes
/// from the partial unique index on (resource_key) WHERE status = 'active';
/// the insert either wins the index slot or reports a conflict.
#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn acquire(
        &self,
        resource_key: &str,
        idempotency_key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Reap an expired holder first so the slot is free. Expiring an
        // already-expired lock is idempotent, so no transaction is needed.
        sqlx::query(
            r#"
            UPDATE transaction_locks SET status = 'expired'
            WHERE resource_key = $1 AND status = 'active' AND expires_at <= $2
            "#,
        )
        .bind(resource_key)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO transaction_locks
                (resource_key, idempotency_key, status, acquired_at, expires_at)
            VALUES ($1, $2, 'active', $3, $4)
            ON CONFLICT (resource_key) WHERE status = 'active' DO NOTHING
            "#,
        )
        .bind(resource_key)
        .bind(idempotency_key)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, resource_key: &str, idempotency_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE transaction_locks SET status = 'released'
            WHERE resource_key = $1 AND idempotency_key = $2 AND status = 'active'
            "#,
        )
        .bind(resource_key)
        .bind(idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE transaction_locks SET status = 'expired' WHERE status = 'active' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

use async_trait::async_trait;
use sqlx::PgPool;

use crate::Result;
use crate::guard::IdempotencyGuard;

/// PostgreSQL-backed guard over the `processed_events` table.
///
/// Relies on the unique constraint on `(aggregate_id, event_type, event_id)`
/// so that concurrent marks of the same triple insert exactly one row.
#[derive(Clone)]
pub struct PostgresIdempotencyGuard {
    pool: PgPool,
}

impl PostgresIdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdempotencyGuard for PostgresIdempotencyGuard {
    #[tracing::instrument(skip(self))]
    async fn is_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM processed_events
                WHERE aggregate_id = $1 AND event_type = $2 AND event_id = $3
            )
            "#,
        )
        .bind(aggregate_id)
        .bind(event_type)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (aggregate_id, event_type, event_id)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT uq_processed_event DO NOTHING
            "#,
        )
        .bind(aggregate_id)
        .bind(event_type)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            tracing::debug!("event already marked processed");
        }
        Ok(inserted)
    }
}

//! PostgreSQL saga log over the `saga_log` table.

use async_trait::async_trait;
use common::{SagaId, StepId};
use outbox::{AppliedSteps, LookupError};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::log::{NewSagaLogEntry, SagaLog, SagaLogEntry};

/// PostgreSQL-backed saga log.
#[derive(Clone)]
pub struct PostgresSagaLog {
    pool: PgPool,
}

impl PostgresSagaLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_entry(row: PgRow) -> Result<SagaLogEntry> {
        let saga_id: Uuid = row.try_get("saga_id")?;
        let step_id: Option<Uuid> = row.try_get("step_id")?;
        let entry_type: String = row.try_get("type")?;
        let status: String = row.try_get("status")?;
        let payload: Option<serde_json::Value> = row.try_get("payload")?;

        Ok(SagaLogEntry {
            id: row.try_get("id")?,
            saga_id: SagaId::from_uuid(saga_id),
            step: row.try_get("step")?,
            step_id: step_id.map(StepId::from_uuid),
            entry_type: entry_type.parse()?,
            payload: payload.unwrap_or(serde_json::Value::Null),
            status: status.parse()?,
            ts: row.try_get("ts")?,
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl SagaLog for PostgresSagaLog {
    #[tracing::instrument(skip(self, entry), fields(saga_id = %entry.saga_id, step = %entry.step))]
    async fn append(&self, entry: NewSagaLogEntry) -> Result<SagaLogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO saga_log (saga_id, step, step_id, type, payload, status, ts, error)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7)
            RETURNING id, saga_id, step, step_id, type, payload, status, ts, error
            "#,
        )
        .bind(entry.saga_id.as_uuid())
        .bind(&entry.step)
        .bind(entry.step_id.map(|id| id.as_uuid()))
        .bind(entry.entry_type.as_str())
        .bind(&entry.payload)
        .bind(entry.status.as_str())
        .bind(&entry.error)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_entry(row)
    }

    async fn entries(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, saga_id, step, step_id, type, payload, status, ts, error
            FROM saga_log
            WHERE saga_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn is_step_applied(&self, saga_id: SagaId, step_id: StepId) -> Result<bool> {
        let applied: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM saga_log
                WHERE saga_id = $1
                  AND step_id = $2
                  AND type = 'EVENT'
                  AND status IN ('CONFIRMED', 'COMPENSATED')
            )
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(step_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(applied)
    }
}

#[async_trait]
impl AppliedSteps for PostgresSagaLog {
    async fn is_step_applied(
        &self,
        saga_id: SagaId,
        step_id: StepId,
    ) -> std::result::Result<bool, LookupError> {
        Ok(SagaLog::is_step_applied(self, saga_id, step_id).await?)
    }
}

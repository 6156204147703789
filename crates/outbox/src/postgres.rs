use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::backoff::MAX_BACKOFF_EXPONENT;
use crate::message::{NewOutboxMessage, OutboxId, OutboxMessage, OutboxStatus};
use crate::store::{ClaimOptions, OutboxStore};
use crate::{OutboxError, Result};

const SELECT_COLUMNS: &str =
    "id, event_type, topic, payload, status, created_at, updated_at, last_error, retry_count";

/// Runs every migration under `migrations/` (outbox, saga log, processed events).
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// Inserts an outbox row on a caller-owned connection.
///
/// Pass a transaction (`&mut *tx`) to make the outbox write commit or roll
/// back together with the business write.
pub async fn enqueue(conn: &mut PgConnection, message: &NewOutboxMessage) -> Result<OutboxId> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox (event_type, topic, payload, status, created_at, retry_count)
        VALUES ($1, $2, $3, 'PENDING', NOW(), 0)
        RETURNING id
        "#,
    )
    .bind(&message.event_type)
    .bind(&message.topic)
    .bind(&message.payload)
    .fetch_one(conn)
    .await?;

    Ok(OutboxId::new(id))
}

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.pool).await?;
        Ok(())
    }

    /// Explains why a fenced status write matched no row.
    async fn lost_claim(&self, id: OutboxId) -> OutboxError {
        let status: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM outbox WHERE id = $1")
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(None) => OutboxError::NotFound(id),
            Ok(Some(status)) => match status.parse() {
                Ok(status) => OutboxError::ClaimLost { id, status },
                Err(e) => e,
            },
            Err(e) => OutboxError::Database(e),
        }
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(OutboxMessage {
            id: OutboxId::new(row.try_get("id")?),
            event_type: row.try_get("event_type")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_error: row.try_get("last_error")?,
            retry_count: retry_count.max(0) as u32,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxId> {
        let mut conn = self.pool.acquire().await?;
        enqueue(&mut *conn, &message).await
    }

    async fn insert_batch(&self, messages: Vec<NewOutboxMessage>) -> Result<Vec<OutboxId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(messages.len());
        for message in &messages {
            ids.push(enqueue(&mut *tx, message).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn claim_batch(&self, options: ClaimOptions) -> Result<Vec<OutboxMessage>> {
        // Lock + claim in one statement; the IN_PROGRESS status is what keeps
        // other workers away once the row locks are released.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM outbox
                WHERE status = 'PENDING'
                   OR (status = 'RETRYING'
                       AND COALESCE(updated_at, created_at)
                           + make_interval(secs => $2::float8 * power(2, LEAST(GREATEST(retry_count - 1, 0), $4)))
                           <= NOW())
                   OR (status = 'IN_PROGRESS'
                       AND COALESCE(updated_at, created_at) + make_interval(secs => $3::float8)
                           <= NOW())
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox o
            SET status = 'IN_PROGRESS', updated_at = NOW()
            FROM claimable c
            WHERE o.id = c.id
            RETURNING o.id, o.event_type, o.topic, o.payload, o.status,
                      o.created_at, o.updated_at, o.last_error, o.retry_count
            "#,
        )
        .bind(i64::from(options.batch_size))
        .bind(options.base_backoff.as_secs_f64())
        .bind(options.claim_timeout.as_secs_f64())
        .bind(MAX_BACKOFF_EXPONENT as i32)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified
        claimed.sort_by_key(|m| m.id);
        Ok(claimed)
    }

    async fn mark_sent(&self, id: OutboxId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'SENT', updated_at = NOW() \
             WHERE id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lost_claim(id).await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        error: &str,
        retry_limit: u32,
    ) -> Result<OutboxStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 < $3 THEN 'RETRYING' ELSE 'FAILED' END,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'IN_PROGRESS'
            RETURNING status
            "#,
        )
        .bind(id.as_i64())
        .bind(error)
        .bind(i32::try_from(retry_limit).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(status) => status.parse(),
            None => Err(self.lost_claim(id).await),
        }
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM outbox WHERE id = $1"))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox WHERE status = $1 ORDER BY id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn requeue(&self, id: OutboxId) -> Result<()> {
        let requeued: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET status = 'PENDING', retry_count = 0, updated_at = NOW()
            WHERE id = $1 AND status = 'FAILED'
            RETURNING id
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        if requeued.is_some() {
            return Ok(());
        }

        match self.get(id).await? {
            Some(row) => Err(OutboxError::InvalidState {
                id,
                status: row.status,
            }),
            None => Err(OutboxError::NotFound(id)),
        }
    }
}

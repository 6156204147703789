use std::time::Duration;

use async_trait::async_trait;

use crate::backoff::RetryPolicy;
use crate::message::{NewOutboxMessage, OutboxId, OutboxMessage, OutboxStatus};
use crate::Result;

/// Parameters for claiming a batch of deliverable rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Maximum number of rows to claim.
    pub batch_size: u32,
    /// Backoff base applied to RETRYING rows.
    pub base_backoff: Duration,
    /// IN_PROGRESS rows untouched for this long are considered abandoned
    /// and may be claimed again.
    pub claim_timeout: Duration,
}

impl ClaimOptions {
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Sets the backoff base.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Sets the stale-claim timeout.
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    /// Backoff policy equivalent to these options, used for eligibility checks.
    pub(crate) fn backoff(&self) -> RetryPolicy {
        RetryPolicy::new(u32::MAX, self.base_backoff)
    }
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            base_backoff: Duration::from_millis(2000),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

/// Durable storage for outgoing messages.
///
/// Rows are never deleted. Implementations must guarantee that a row
/// returned by [`claim_batch`](OutboxStore::claim_batch) is not returned to
/// any other caller until it leaves IN_PROGRESS or its claim goes stale.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts a PENDING row and returns its id.
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxId>;

    /// Inserts several PENDING rows, returning ids in input order.
    async fn insert_batch(&self, messages: Vec<NewOutboxMessage>) -> Result<Vec<OutboxId>>;

    /// Locks and claims up to `batch_size` deliverable rows, marking them
    /// IN_PROGRESS. Rows are returned in ascending id order.
    ///
    /// Deliverable means PENDING, RETRYING with its backoff elapsed, or
    /// IN_PROGRESS with a stale claim.
    async fn claim_batch(&self, options: ClaimOptions) -> Result<Vec<OutboxMessage>>;

    /// Marks a claimed row as SENT. Fails with `ClaimLost` unless the row
    /// is still IN_PROGRESS.
    async fn mark_sent(&self, id: OutboxId) -> Result<()>;

    /// Records a failed attempt: increments `retry_count`, stores the error
    /// text and moves the row to RETRYING or, once the limit is reached,
    /// FAILED. Returns the new status. Like `mark_sent`, only applies to an
    /// IN_PROGRESS row.
    async fn mark_failed(&self, id: OutboxId, error: &str, retry_limit: u32)
    -> Result<OutboxStatus>;

    /// Loads a single row.
    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>>;

    /// Lists rows in a given status, ordered by id.
    async fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxMessage>>;

    /// Puts a FAILED row back to PENDING with a fresh retry budget.
    async fn requeue(&self, id: OutboxId) -> Result<()>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<T> {
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxId> {
        (**self).insert(message).await
    }

    async fn insert_batch(&self, messages: Vec<NewOutboxMessage>) -> Result<Vec<OutboxId>> {
        (**self).insert_batch(messages).await
    }

    async fn claim_batch(&self, options: ClaimOptions) -> Result<Vec<OutboxMessage>> {
        (**self).claim_batch(options).await
    }

    async fn mark_sent(&self, id: OutboxId) -> Result<()> {
        (**self).mark_sent(id).await
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        error: &str,
        retry_limit: u32,
    ) -> Result<OutboxStatus> {
        (**self).mark_failed(id, error, retry_limit).await
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>> {
        (**self).get(id).await
    }

    async fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxMessage>> {
        (**self).list_by_status(status).await
    }

    async fn requeue(&self, id: OutboxId) -> Result<()> {
        (**self).requeue(id).await
    }
}

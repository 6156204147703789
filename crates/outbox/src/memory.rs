use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::backoff::RetryPolicy;
use crate::message::{NewOutboxMessage, OutboxId, OutboxMessage, OutboxStatus};
use crate::store::{ClaimOptions, OutboxStore};
use crate::{OutboxError, Result};

#[derive(Debug, Default)]
struct InMemoryOutboxState {
    rows: Vec<OutboxMessage>,
    next_id: i64,
}

impl InMemoryOutboxState {
    fn row_mut(&mut self, id: OutboxId) -> Result<&mut OutboxMessage> {
        self.rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(OutboxError::NotFound(id))
    }

    fn claimed_row_mut(&mut self, id: OutboxId) -> Result<&mut OutboxMessage> {
        let row = self.row_mut(id)?;
        if row.status != OutboxStatus::InProgress {
            return Err(OutboxError::ClaimLost {
                id,
                status: row.status,
            });
        }
        Ok(row)
    }

    fn push(&mut self, message: NewOutboxMessage) -> OutboxId {
        self.next_id += 1;
        let id = OutboxId::new(self.next_id);
        self.rows.push(OutboxMessage {
            id,
            event_type: message.event_type,
            topic: message.topic,
            payload: message.payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            last_error: None,
            retry_count: 0,
        });
        id
    }
}

/// In-memory outbox store for tests and database-less runs.
///
/// Claims happen under a single write lock, which gives the same
/// "each row to at most one worker" guarantee as the locked select.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<InMemoryOutboxState>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    /// Returns true if no row was ever inserted.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.rows.is_empty()
    }

    /// Returns every row in id order.
    pub async fn all(&self) -> Vec<OutboxMessage> {
        self.state.read().await.rows.clone()
    }

    fn is_claimable(row: &OutboxMessage, options: &ClaimOptions, now: DateTime<Utc>) -> bool {
        match row.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Retrying => {
                options
                    .backoff()
                    .is_due(row.retry_count, row.last_touched(), now)
            }
            OutboxStatus::InProgress => {
                let elapsed = (now - row.last_touched()).to_std().unwrap_or_default();
                elapsed >= options.claim_timeout
            }
            OutboxStatus::Sent | OutboxStatus::Failed => false,
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxId> {
        Ok(self.state.write().await.push(message))
    }

    async fn insert_batch(&self, messages: Vec<NewOutboxMessage>) -> Result<Vec<OutboxId>> {
        let mut state = self.state.write().await;
        Ok(messages.into_iter().map(|m| state.push(m)).collect())
    }

    async fn claim_batch(&self, options: ClaimOptions) -> Result<Vec<OutboxMessage>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut claimed = Vec::new();
        for row in state.rows.iter_mut() {
            if claimed.len() >= options.batch_size as usize {
                break;
            }
            if Self::is_claimable(row, &options, now) {
                row.status = OutboxStatus::InProgress;
                row.updated_at = Some(now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: OutboxId) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state.claimed_row_mut(id)?;
        row.status = OutboxStatus::Sent;
        row.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: OutboxId,
        error: &str,
        retry_limit: u32,
    ) -> Result<OutboxStatus> {
        let mut state = self.state.write().await;
        let row = state.claimed_row_mut(id)?;
        row.retry_count += 1;
        row.status = RetryPolicy::new(retry_limit, Default::default())
            .status_after_failure(row.retry_count);
        row.last_error = Some(error.to_string());
        row.updated_at = Some(Utc::now());
        Ok(row.status)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state.rows.iter().find(|row| row.id == id).cloned())
    }

    async fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.status == status)
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: OutboxId) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state.row_mut(id)?;
        if row.status != OutboxStatus::Failed {
            return Err(OutboxError::InvalidState {
                id,
                status: row.status,
            });
        }
        row.status = OutboxStatus::Pending;
        row.retry_count = 0;
        row.updated_at = Some(Utc::now());
        Ok(())
    }
}

//! In-memory saga log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{SagaId, StepId};
use outbox::{AppliedSteps, LookupError};
use tokio::sync::RwLock;

use crate::Result;
use crate::log::{EntryType, NewSagaLogEntry, SagaLog, SagaLogEntry};

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<SagaLogEntry>,
    next_id: i64,
}

/// In-memory saga log for tests and database-less runs.
#[derive(Clone, Default)]
pub struct InMemorySagaLog {
    state: Arc<RwLock<LogState>>,
}

impl InMemorySagaLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all sagas.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

#[async_trait]
impl SagaLog for InMemorySagaLog {
    async fn append(&self, entry: NewSagaLogEntry) -> Result<SagaLogEntry> {
        let mut state = self.state.write().await;
        state.next_id += 1;

        let stored = SagaLogEntry {
            id: state.next_id,
            saga_id: entry.saga_id,
            step: entry.step,
            step_id: entry.step_id,
            entry_type: entry.entry_type,
            payload: entry.payload,
            status: entry.status,
            ts: Utc::now(),
            error: entry.error,
        };
        state.entries.push(stored.clone());
        Ok(stored)
    }

    async fn entries(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect())
    }

    async fn is_step_applied(&self, saga_id: SagaId, step_id: StepId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.entries.iter().any(|e| {
            e.saga_id == saga_id
                && e.step_id == Some(step_id)
                && e.entry_type == EntryType::Event
                && e.status.is_applied()
        }))
    }
}

#[async_trait]
impl AppliedSteps for InMemorySagaLog {
    async fn is_step_applied(
        &self,
        saga_id: SagaId,
        step_id: StepId,
    ) -> std::result::Result<bool, LookupError> {
        Ok(SagaLog::is_step_applied(self, saga_id, step_id).await?)
    }
}

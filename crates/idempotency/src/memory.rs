use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Result;
use crate::guard::IdempotencyGuard;

type Key = (String, String, String);

/// In-memory processed-event set.
///
/// Suitable for tests and single-process demos; contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyGuard {
    processed: Arc<RwLock<HashSet<Key>>>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct processed triples.
    pub async fn len(&self) -> usize {
        self.processed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processed.read().await.is_empty()
    }
}

fn key(aggregate_id: &str, event_type: &str, event_id: &str) -> Key {
    (
        aggregate_id.to_string(),
        event_type.to_string(),
        event_id.to_string(),
    )
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn is_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        let processed = self.processed.read().await;
        Ok(processed.contains(&key(aggregate_id, event_type, event_id)))
    }

    async fn mark_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        let mut processed = self.processed.write().await;
        Ok(processed.insert(key(aggregate_id, event_type, event_id)))
    }
}

use async_trait::async_trait;

use crate::Result;

/// Records which events a consumer has already applied.
///
/// An event is identified by the triple `(aggregate_id, event_type,
/// event_id)`. Consumers check before applying side effects and mark after;
/// marking the same triple twice is a no-op.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Returns true if the triple has been marked processed.
    async fn is_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool>;

    /// Marks the triple processed. Returns false if it already was.
    async fn mark_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool>;
}

#[async_trait]
impl<T: IdempotencyGuard + ?Sized> IdempotencyGuard for std::sync::Arc<T> {
    async fn is_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        (**self)
            .is_event_processed(aggregate_id, event_type, event_id)
            .await
    }

    async fn mark_event_processed(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event_id: &str,
    ) -> Result<bool> {
        (**self)
            .mark_event_processed(aggregate_id, event_type, event_id)
            .await
    }
}

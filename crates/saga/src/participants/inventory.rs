//! Mock inventory service: reserves and releases stock for a saga.

use std::sync::Arc;

use idempotency::IdempotencyGuard;
use outbox::MessageSink;

use super::{ParticipantOutcome, StepKey, StepRequest};
use crate::Result;
use crate::log::{SagaLog, StepStatus};
use crate::order_fulfillment::{STEP_RELEASE_INVENTORY, STEP_RESERVE_INVENTORY};
use crate::orchestrator::SagaOrchestrator;

/// Handles `inventory.reserve` and `inventory.release` deliveries.
pub struct InventoryParticipant<L: SagaLog, M: MessageSink, G: IdempotencyGuard> {
    orchestrator: Arc<SagaOrchestrator<L, M>>,
    guard: G,
}

impl<L: SagaLog, M: MessageSink, G: IdempotencyGuard> InventoryParticipant<L, M, G> {
    pub fn new(orchestrator: Arc<SagaOrchestrator<L, M>>, guard: G) -> Self {
        Self {
            orchestrator,
            guard,
        }
    }

    /// Reserves stock. On success records CONFIRMED and issues the charge,
    /// using the request amount or the saga's starting amount.
    #[tracing::instrument(skip(self), fields(saga_id = %request.saga_id))]
    pub async fn reserve(&self, request: &StepRequest) -> Result<ParticipantOutcome> {
        let key = StepKey::for_request(request, STEP_RESERVE_INVENTORY);
        if let Some(key) = &key {
            if key.is_processed(&self.guard).await? {
                return Ok(ParticipantOutcome::Duplicate);
            }
        }

        let outcome = if request.force_fail {
            self.orchestrator
                .record_event(
                    request.saga_id,
                    STEP_RESERVE_INVENTORY,
                    request.saga_step_id,
                    serde_json::json!({ "success": false }),
                    StepStatus::Failed,
                    Some("forced"),
                )
                .await?;
            ParticipantOutcome::Declined {
                reason: "forced".to_string(),
            }
        } else {
            self.orchestrator
                .record_event(
                    request.saga_id,
                    STEP_RESERVE_INVENTORY,
                    request.saga_step_id,
                    serde_json::json!({ "success": true }),
                    StepStatus::Confirmed,
                    None,
                )
                .await?;

            let amount = match request.amount {
                Some(amount) => amount,
                None => self
                    .orchestrator
                    .instance(request.saga_id)
                    .await?
                    .map(|saga| saga.amount())
                    .unwrap_or(0.0),
            };
            self.orchestrator
                .charge_payment(request.saga_id, amount)
                .await?;
            ParticipantOutcome::Applied
        };

        if let Some(key) = &key {
            key.mark_processed(&self.guard).await?;
        }
        Ok(outcome)
    }

    /// Releases the reservation (compensation). Always succeeds.
    #[tracing::instrument(skip(self), fields(saga_id = %request.saga_id))]
    pub async fn release(&self, request: &StepRequest) -> Result<ParticipantOutcome> {
        let key = StepKey::for_request(request, STEP_RELEASE_INVENTORY);
        if let Some(key) = &key {
            if key.is_processed(&self.guard).await? {
                return Ok(ParticipantOutcome::Duplicate);
            }
        }

        self.orchestrator
            .record_event(
                request.saga_id,
                STEP_RELEASE_INVENTORY,
                request.saga_step_id,
                serde_json::json!({ "released": true }),
                StepStatus::Compensated,
                None,
            )
            .await?;

        if let Some(key) = &key {
            key.mark_processed(&self.guard).await?;
        }
        Ok(ParticipantOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use common::SagaId;
    use idempotency::InMemoryIdempotencyGuard;
    use outbox::{InMemoryOutboxStore, OutboxPublisher};

    use super::*;
    use crate::log::EntryType;
    use crate::memory::InMemorySagaLog;

    type TestInventory =
        InventoryParticipant<InMemorySagaLog, OutboxPublisher<InMemoryOutboxStore>, InMemoryIdempotencyGuard>;

    fn setup() -> (
        TestInventory,
        Arc<SagaOrchestrator<InMemorySagaLog, OutboxPublisher<InMemoryOutboxStore>>>,
        InMemoryOutboxStore,
    ) {
        let store = InMemoryOutboxStore::new();
        let orchestrator = Arc::new(SagaOrchestrator::new(
            InMemorySagaLog::new(),
            OutboxPublisher::new(store.clone()),
        ));
        let inventory =
            InventoryParticipant::new(orchestrator.clone(), InMemoryIdempotencyGuard::new());
        (inventory, orchestrator, store)
    }

    #[tokio::test]
    async fn reserve_confirms_and_issues_charge_with_start_amount() {
        let (inventory, orch, store) = setup();
        let saga_id = orch
            .start(None, vec!["SKU1".to_string()], 100.0)
            .await
            .unwrap();
        let step_id = orch
            .reserve_inventory(saga_id, &["SKU1".to_string()])
            .await
            .unwrap();

        let outcome = inventory
            .reserve(&StepRequest::new(saga_id, Some(step_id)))
            .await
            .unwrap();
        assert_eq!(outcome, ParticipantOutcome::Applied);

        let log = orch.log(saga_id).await.unwrap();
        assert_eq!(log[2].step, "reserve_inventory");
        assert_eq!(log[2].entry_type, EntryType::Event);
        assert_eq!(log[2].status, StepStatus::Confirmed);
        assert_eq!(log[2].step_id, Some(step_id));
        assert_eq!(log[3].step, "charge_payment");
        assert_eq!(log[3].entry_type, EntryType::Command);

        let rows = store.all().await;
        assert_eq!(rows.last().unwrap().topic, "payment.charge");
        assert_eq!(rows.last().unwrap().payload["amount"], 100.0);
    }

    #[tokio::test]
    async fn request_amount_wins_over_start_amount() {
        let (inventory, orch, store) = setup();
        let saga_id = orch.start(None, vec![], 100.0).await.unwrap();

        inventory
            .reserve(&StepRequest::new(saga_id, None).with_amount(7.5))
            .await
            .unwrap();

        assert_eq!(store.all().await[0].payload["amount"], 7.5);
    }

    #[tokio::test]
    async fn forced_reserve_failure_is_declined() {
        let (inventory, orch, store) = setup();
        let saga_id = SagaId::new();

        let outcome = inventory
            .reserve(&StepRequest::new(saga_id, Some(common::StepId::new())).failing())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ParticipantOutcome::Declined {
                reason: "forced".to_string()
            }
        );

        let log = orch.log(saga_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, StepStatus::Failed);
        assert_eq!(log[0].error.as_deref(), Some("forced"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_reserve_is_a_noop() {
        let (inventory, orch, store) = setup();
        let saga_id = orch.start(None, vec![], 10.0).await.unwrap();
        let request = StepRequest::new(saga_id, Some(common::StepId::new()));

        assert_eq!(inventory.reserve(&request).await.unwrap(), ParticipantOutcome::Applied);
        let entries_after_first = orch.log(saga_id).await.unwrap().len();

        assert_eq!(inventory.reserve(&request).await.unwrap(), ParticipantOutcome::Duplicate);
        assert_eq!(orch.log(saga_id).await.unwrap().len(), entries_after_first);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn release_records_compensated() {
        let (inventory, orch, _) = setup();
        let saga_id = SagaId::new();
        let step_id = orch.release_inventory(saga_id).await.unwrap();

        let request = StepRequest::new(saga_id, Some(step_id));
        assert_eq!(inventory.release(&request).await.unwrap(), ParticipantOutcome::Applied);
        assert_eq!(inventory.release(&request).await.unwrap(), ParticipantOutcome::Duplicate);

        let log = orch.log(saga_id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].status, StepStatus::Compensated);
        assert_eq!(log[1].payload, serde_json::json!({ "released": true }));
    }
}

//! Mock payment service: charges the order amount.

use std::sync::Arc;

use idempotency::IdempotencyGuard;
use outbox::MessageSink;

use super::{ParticipantOutcome, StepKey, StepRequest};
use crate::Result;
use crate::log::{SagaLog, StepStatus};
use crate::order_fulfillment::STEP_CHARGE_PAYMENT;
use crate::orchestrator::SagaOrchestrator;

/// Handles `payment.charge` deliveries.
pub struct PaymentParticipant<L: SagaLog, M: MessageSink, G: IdempotencyGuard> {
    orchestrator: Arc<SagaOrchestrator<L, M>>,
    guard: G,
}

impl<L: SagaLog, M: MessageSink, G: IdempotencyGuard> PaymentParticipant<L, M, G> {
    pub fn new(orchestrator: Arc<SagaOrchestrator<L, M>>, guard: G) -> Self {
        Self {
            orchestrator,
            guard,
        }
    }

    /// Charges the order. A success completes the saga; a decline records
    /// FAILED and enqueues the inventory release.
    #[tracing::instrument(skip(self), fields(saga_id = %request.saga_id))]
    pub async fn charge(&self, request: &StepRequest) -> Result<ParticipantOutcome> {
        let key = StepKey::for_request(request, STEP_CHARGE_PAYMENT);
        if let Some(key) = &key {
            if key.is_processed(&self.guard).await? {
                return Ok(ParticipantOutcome::Duplicate);
            }
        }

        let outcome = if request.force_fail {
            self.orchestrator
                .record_event(
                    request.saga_id,
                    STEP_CHARGE_PAYMENT,
                    request.saga_step_id,
                    serde_json::json!({ "success": false }),
                    StepStatus::Failed,
                    Some("forced"),
                )
                .await?;
            self.orchestrator
                .release_inventory(request.saga_id)
                .await?;
            ParticipantOutcome::Declined {
                reason: "forced".to_string(),
            }
        } else {
            self.orchestrator
                .record_event(
                    request.saga_id,
                    STEP_CHARGE_PAYMENT,
                    request.saga_step_id,
                    serde_json::json!({ "success": true }),
                    StepStatus::Confirmed,
                    None,
                )
                .await?;
            self.orchestrator.complete(request.saga_id).await?;
            ParticipantOutcome::Applied
        };

        if let Some(key) = &key {
            key.mark_processed(&self.guard).await?;
        }
        Ok(outcome)
    }
}

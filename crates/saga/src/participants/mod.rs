//! Mock downstream participants (inventory, payment).
//!
//! They stand in for the services that would receive the outbox deliveries:
//! each one reports its outcome back to the orchestrator and, on success,
//! triggers the next saga step.

pub mod inventory;
pub mod payment;

use common::{SagaId, StepId};
use idempotency::IdempotencyGuard;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use inventory::InventoryParticipant;
pub use payment::PaymentParticipant;

/// A delivered saga command as seen by a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub saga_id: SagaId,
    #[serde(default)]
    pub saga_step_id: Option<StepId>,
    /// Makes the participant decline, for exercising compensation.
    #[serde(default)]
    pub force_fail: bool,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub items: Option<Vec<String>>,
}

impl StepRequest {
    pub fn new(saga_id: SagaId, saga_step_id: Option<StepId>) -> Self {
        Self {
            saga_id,
            saga_step_id,
            force_fail: false,
            amount: None,
            items: None,
        }
    }

    pub fn failing(mut self) -> Self {
        self.force_fail = true;
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// What a participant did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantOutcome {
    /// The step succeeded and the saga moved on.
    Applied,
    /// The step was refused; a FAILED event was recorded.
    Declined { reason: String },
    /// This step id was already handled; nothing was done.
    Duplicate,
}

impl ParticipantOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ParticipantOutcome::Declined { .. })
    }
}

/// Dedup key for a participant step: `(sagaId, step, sagaStepId)`.
///
/// Requests without a step id cannot be deduplicated and are always applied.
pub(crate) struct StepKey {
    aggregate_id: String,
    step: &'static str,
    event_id: String,
}

impl StepKey {
    pub(crate) fn for_request(request: &StepRequest, step: &'static str) -> Option<Self> {
        let step_id = request.saga_step_id?;
        Some(Self {
            aggregate_id: request.saga_id.to_string(),
            step,
            event_id: step_id.to_string(),
        })
    }

    pub(crate) async fn is_processed<G: IdempotencyGuard>(&self, guard: &G) -> Result<bool> {
        let processed = guard
            .is_event_processed(&self.aggregate_id, self.step, &self.event_id)
            .await?;
        if processed {
            metrics::counter!("idempotency_duplicates_total", "step" => self.step).increment(1);
            tracing::info!(
                saga_id = %self.aggregate_id,
                step = self.step,
                step_id = %self.event_id,
                "duplicate delivery ignored"
            );
        }
        Ok(processed)
    }

    pub(crate) async fn mark_processed<G: IdempotencyGuard>(&self, guard: &G) -> Result<()> {
        guard
            .mark_event_processed(&self.aggregate_id, self.step, &self.event_id)
            .await?;
        Ok(())
    }
}

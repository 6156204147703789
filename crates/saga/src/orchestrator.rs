//! Saga orchestrator: issues step commands through the outbox and records
//! the saga timeline.

use common::{SagaId, StepId};
use outbox::MessageSink;

use crate::Result;
use crate::aggregate::SagaInstance;
use crate::log::{NewSagaLogEntry, SagaLog, SagaLogEntry, StepStatus};
use crate::order_fulfillment::{
    CMD_CHARGE_PAYMENT, CMD_RELEASE_INVENTORY, CMD_RESERVE_INVENTORY, STEP_CHARGE_PAYMENT,
    STEP_COMPLETE, STEP_RELEASE_INVENTORY, STEP_RESERVE_INVENTORY, STEP_START,
    TOPIC_INVENTORY_RELEASE, TOPIC_INVENTORY_RESERVE, TOPIC_PAYMENT_CHARGE,
};

/// Drives the order fulfillment saga (reserve → charge, release on failure).
///
/// The orchestrator never calls participants directly. Each command is
/// published to the outbox through the injected [`MessageSink`] and then
/// logged as a PENDING COMMAND entry; participants report back through
/// [`record_event`](Self::record_event). Business failures are not retried
/// here; only the outbox worker retries deliveries.
pub struct SagaOrchestrator<L: SagaLog, M: MessageSink> {
    log: L,
    sink: M,
}

impl<L: SagaLog, M: MessageSink> SagaOrchestrator<L, M> {
    pub fn new(log: L, sink: M) -> Self {
        Self { log, sink }
    }

    pub fn saga_log(&self) -> &L {
        &self.log
    }

    pub fn sink(&self) -> &M {
        &self.sink
    }

    /// Opens a saga, using `saga_id` when given, and logs the `start` command.
    #[tracing::instrument(skip(self, items))]
    pub async fn start(
        &self,
        saga_id: Option<SagaId>,
        items: Vec<String>,
        amount: f64,
    ) -> Result<SagaId> {
        let saga_id = saga_id.unwrap_or_default();
        self.log
            .append(NewSagaLogEntry::command(
                saga_id,
                STEP_START,
                None,
                serde_json::json!({ "items": items, "amount": amount }),
            ))
            .await?;

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, "saga started");
        Ok(saga_id)
    }

    /// Enqueues `ReserveInventory` on `inventory.reserve`.
    pub async fn reserve_inventory(&self, saga_id: SagaId, items: &[String]) -> Result<StepId> {
        self.issue(
            saga_id,
            STEP_RESERVE_INVENTORY,
            TOPIC_INVENTORY_RESERVE,
            CMD_RESERVE_INVENTORY,
            Some(("items", serde_json::json!(items))),
        )
        .await
    }

    /// Enqueues `ChargePayment` on `payment.charge`.
    pub async fn charge_payment(&self, saga_id: SagaId, amount: f64) -> Result<StepId> {
        self.issue(
            saga_id,
            STEP_CHARGE_PAYMENT,
            TOPIC_PAYMENT_CHARGE,
            CMD_CHARGE_PAYMENT,
            Some(("amount", serde_json::json!(amount))),
        )
        .await
    }

    /// Enqueues the `ReleaseInventory` compensation on `inventory.release`.
    pub async fn release_inventory(&self, saga_id: SagaId) -> Result<StepId> {
        self.issue(
            saga_id,
            STEP_RELEASE_INVENTORY,
            TOPIC_INVENTORY_RELEASE,
            CMD_RELEASE_INVENTORY,
            None,
        )
        .await
    }

    /// Appends an EVENT entry reported by a participant.
    #[tracing::instrument(skip(self, payload))]
    pub async fn record_event(
        &self,
        saga_id: SagaId,
        step: &str,
        step_id: Option<StepId>,
        payload: serde_json::Value,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<SagaLogEntry> {
        let mut entry = NewSagaLogEntry::event(saga_id, step, step_id, payload, status);
        if let Some(error) = error {
            entry = entry.with_error(error);
        }
        let stored = self.log.append(entry).await?;

        metrics::counter!(
            "saga_events_recorded_total",
            "step" => step.to_string(),
            "status" => status.as_str()
        )
        .increment(1);
        if status == StepStatus::Failed {
            tracing::warn!(%saga_id, step, error = ?error, "saga step failed");
        } else {
            tracing::info!(%saga_id, step, %status, "saga event recorded");
        }
        Ok(stored)
    }

    /// Records the terminal `complete` event.
    pub async fn complete(&self, saga_id: SagaId) -> Result<SagaLogEntry> {
        let entry = self
            .record_event(
                saga_id,
                STEP_COMPLETE,
                None,
                serde_json::json!({ "status": StepStatus::Confirmed.as_str() }),
                StepStatus::Confirmed,
                None,
            )
            .await?;
        metrics::counter!("saga_completed_total").increment(1);
        Ok(entry)
    }

    /// The saga's full log, in call order.
    pub async fn log(&self, saga_id: SagaId) -> Result<Vec<SagaLogEntry>> {
        self.log.entries(saga_id).await
    }

    /// The saga folded into a [`SagaInstance`], or `None` if it has no entries.
    pub async fn instance(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let entries = self.log.entries(saga_id).await?;
        Ok(SagaInstance::from_entries(&entries))
    }

    // Publish first: a logged command always has a queued message behind it.
    #[tracing::instrument(skip(self, field))]
    async fn issue(
        &self,
        saga_id: SagaId,
        step: &'static str,
        topic: &'static str,
        command: &'static str,
        field: Option<(&str, serde_json::Value)>,
    ) -> Result<StepId> {
        let step_id = StepId::new();
        let mut payload = serde_json::json!({
            "sagaId": saga_id,
            "type": command,
            "sagaStepId": step_id,
        });
        if let Some((key, value)) = field {
            payload[key] = value;
        }

        let message_id = self.sink.send(topic, payload.clone()).await?;
        self.log
            .append(NewSagaLogEntry::command(saga_id, step, Some(step_id), payload))
            .await?;

        metrics::counter!("saga_commands_issued_total", "step" => step).increment(1);
        tracing::info!(%saga_id, step, %step_id, %message_id, "saga command issued");
        Ok(step_id)
    }
}

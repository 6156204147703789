//! Outbox polling and delivery worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{SagaId, StepId};
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryPolicy;
use crate::handler::DeliveryHandler;
use crate::message::{OutboxMessage, OutboxStatus};
use crate::store::{ClaimOptions, OutboxStore};
use crate::{OutboxError, Result};

/// Error type for [`AppliedSteps`] lookups, which live outside this crate.
pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// Answers whether a saga step has already taken effect downstream.
///
/// The worker uses this to skip re-delivering a command whose outcome
/// (CONFIRMED or COMPENSATED) is already on record.
#[async_trait]
pub trait AppliedSteps: Send + Sync {
    async fn is_step_applied(
        &self,
        saga_id: SagaId,
        step_id: StepId,
    ) -> std::result::Result<bool, LookupError>;
}

/// Tunables for an [`OutboxWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Maximum rows claimed per cycle.
    pub batch_size: u32,
    /// Failed attempts before a row becomes FAILED.
    pub retry_limit: u32,
    /// Backoff base; a row with `k` failures waits `base * 2^(k-1)`.
    pub base_backoff: Duration,
    /// Age after which an IN_PROGRESS claim is considered abandoned.
    pub claim_timeout: Duration,
}

impl WorkerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit, self.base_backoff)
    }

    pub fn claim_options(&self) -> ClaimOptions {
        ClaimOptions::new(self.batch_size)
            .with_base_backoff(self.base_backoff)
            .with_claim_timeout(self.claim_timeout)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            batch_size: 10,
            retry_limit: 5,
            base_backoff: Duration::from_millis(2000),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

/// What happened to a single row during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Sent,
    Skipped,
    Failed(OutboxStatus),
    /// Another worker took the row over; this worker's outcome was dropped.
    ClaimLost,
}

/// Polls the outbox, delivers claimed rows and records the outcome.
///
/// Each row's status write is independent: a failure on one row never
/// undoes what was recorded for the rows before it in the same cycle.
pub struct OutboxWorker<S: OutboxStore, H: DeliveryHandler> {
    store: S,
    handler: H,
    config: WorkerConfig,
    applied_steps: Option<Arc<dyn AppliedSteps>>,
    shutdown: CancellationToken,
}

impl<S: OutboxStore, H: DeliveryHandler> OutboxWorker<S, H> {
    pub fn new(store: S, handler: H, config: WorkerConfig) -> Self {
        Self {
            store,
            handler,
            config,
            applied_steps: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Enables the already-applied short-circuit for saga commands.
    pub fn with_applied_steps(mut self, applied_steps: Arc<dyn AppliedSteps>) -> Self {
        self.applied_steps = Some(applied_steps);
        self
    }

    /// Uses an externally owned token (e.g. a child of the process token).
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claims and processes one batch. Returns the number of rows claimed.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let started = Instant::now();
        let batch = self.store.claim_batch(self.config.claim_options()).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut sent = 0usize;
        for message in &batch {
            match self.process(message).await {
                Ok(RowOutcome::Sent | RowOutcome::Skipped) => sent += 1,
                Ok(RowOutcome::Failed(_) | RowOutcome::ClaimLost) => {}
                Err(e) => {
                    // Row stays IN_PROGRESS and is reclaimed after the claim timeout
                    tracing::error!(id = %message.id, error = %e, "failed to record delivery outcome");
                }
            }
        }

        metrics::histogram!("outbox_poll_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(claimed = batch.len(), sent, "outbox cycle complete");
        Ok(batch.len())
    }

    /// Runs cycles until [`stop`](Self::stop) is called or the token is cancelled.
    ///
    /// Errors from a cycle (e.g. the database being unreachable) are logged
    /// and the loop carries on at the next interval.
    pub async fn run(&self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox worker started"
        );

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.run_once().await {
                metrics::counter!("outbox_poll_errors_total").increment(1);
                tracing::error!(error = %e, "outbox poll failed");
            }

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("outbox worker stopped");
    }

    /// Asks the run loop to exit after the current cycle.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn process(&self, message: &OutboxMessage) -> Result<RowOutcome> {
        if self.already_applied(message).await {
            if let Err(e) = self.store.mark_sent(message.id).await {
                return self.claim_lost(message, e);
            }
            metrics::counter!("outbox_messages_skipped_total").increment(1);
            tracing::info!(id = %message.id, "saga step already applied, skipping delivery");
            return Ok(RowOutcome::Skipped);
        }

        match self.handler.deliver(message).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_sent(message.id).await {
                    return self.claim_lost(message, e);
                }
                metrics::counter!("outbox_messages_sent_total", "topic" => message.topic.clone())
                    .increment(1);
                tracing::info!(id = %message.id, topic = %message.topic, "outbox message sent");
                Ok(RowOutcome::Sent)
            }
            Err(delivery_error) => {
                let status = match self
                    .store
                    .mark_failed(message.id, &delivery_error.to_string(), self.config.retry_limit)
                    .await
                {
                    Ok(status) => status,
                    Err(e) => return self.claim_lost(message, e),
                };
                metrics::counter!("outbox_delivery_failures_total", "topic" => message.topic.clone())
                    .increment(1);

                if status == OutboxStatus::Failed {
                    metrics::counter!("outbox_messages_failed_total").increment(1);
                    tracing::error!(
                        id = %message.id,
                        topic = %message.topic,
                        attempts = message.retry_count + 1,
                        error = %delivery_error,
                        "outbox message failed permanently"
                    );
                } else {
                    tracing::warn!(
                        id = %message.id,
                        topic = %message.topic,
                        attempt = message.retry_count + 1,
                        retry_in_ms = self.config.retry_policy().backoff_for(message.retry_count + 1).as_millis() as u64,
                        error = %delivery_error,
                        "outbox delivery failed, will retry"
                    );
                }
                Ok(RowOutcome::Failed(status))
            }
        }
    }

    /// Turns a lost claim into a dropped outcome; other errors pass through.
    fn claim_lost(&self, message: &OutboxMessage, error: OutboxError) -> Result<RowOutcome> {
        let OutboxError::ClaimLost { status, .. } = error else {
            return Err(error);
        };
        metrics::counter!("outbox_claims_lost_total").increment(1);
        tracing::warn!(
            id = %message.id,
            topic = %message.topic,
            %status,
            "claim lost to another worker, outcome not recorded"
        );
        Ok(RowOutcome::ClaimLost)
    }

    async fn already_applied(&self, message: &OutboxMessage) -> bool {
        let (Some(applied_steps), Some((saga_id, step_id))) =
            (self.applied_steps.as_ref(), message.saga_step())
        else {
            return false;
        };

        match applied_steps.is_step_applied(saga_id, step_id).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "applied-step check failed, delivering anyway");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::DeliveryError;
    use crate::handler::TopicRouter;
    use crate::memory::InMemoryOutboxStore;
    use crate::message::NewOutboxMessage;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            base_backoff: Duration::ZERO,
            ..WorkerConfig::default()
        }
    }

    /// Fails the first `failures` attempts for every row, then succeeds.
    #[derive(Default)]
    struct FlakyHandler {
        failures: usize,
        attempts: Mutex<HashMap<i64, usize>>,
    }

    impl FlakyHandler {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl DeliveryHandler for FlakyHandler {
        async fn deliver(&self, message: &OutboxMessage) -> std::result::Result<(), DeliveryError> {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(message.id.as_i64()).or_insert(0);
            *n += 1;
            if *n <= self.failures {
                Err(DeliveryError::Transport(format!("attempt {n} refused")))
            } else {
                Ok(())
            }
        }
    }

    /// Fails only for payloads marked `"poison": true`.
    struct PoisonHandler;

    #[async_trait]
    impl DeliveryHandler for PoisonHandler {
        async fn deliver(&self, message: &OutboxMessage) -> std::result::Result<(), DeliveryError> {
            if message.payload["poison"] == true {
                Err(DeliveryError::Rejected("poison".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        delivered: Mutex<Vec<i64>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for RecordingHandler {
        async fn deliver(&self, message: &OutboxMessage) -> std::result::Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.delivered.lock().unwrap().push(message.id.as_i64());
            Ok(())
        }
    }

    struct FixedAppliedSteps(HashSet<StepId>);

    #[async_trait]
    impl AppliedSteps for FixedAppliedSteps {
        async fn is_step_applied(
            &self,
            _saga_id: SagaId,
            step_id: StepId,
        ) -> std::result::Result<bool, LookupError> {
            Ok(self.0.contains(&step_id))
        }
    }

    struct BrokenAppliedSteps;

    #[async_trait]
    impl AppliedSteps for BrokenAppliedSteps {
        async fn is_step_applied(
            &self,
            _saga_id: SagaId,
            _step_id: StepId,
        ) -> std::result::Result<bool, LookupError> {
            Err("saga log unavailable".into())
        }
    }

    async fn enqueue(store: &InMemoryOutboxStore, payload: serde_json::Value) -> crate::OutboxId {
        store
            .insert(NewOutboxMessage::new("payment.charge", payload))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn working_handler_sends_everything() {
        let store = InMemoryOutboxStore::new();
        for n in 0..25 {
            enqueue(&store, serde_json::json!({ "n": n })).await;
        }
        let worker = OutboxWorker::new(store.clone(), RecordingHandler::default(), fast_config());

        let mut cycles = 0;
        while worker.run_once().await.unwrap() > 0 {
            cycles += 1;
        }

        assert_eq!(cycles, 3);
        assert_eq!(store.list_by_status(OutboxStatus::Sent).await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn batch_is_delivered_in_id_order() {
        let store = InMemoryOutboxStore::new();
        for n in 0..5 {
            enqueue(&store, serde_json::json!({ "n": n })).await;
        }
        let handler = Arc::new(RecordingHandler::default());
        let worker = OutboxWorker::new(store, handler.clone(), fast_config());

        worker.run_once().await.unwrap();

        let delivered = handler.delivered.lock().unwrap().clone();
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let worker = OutboxWorker::new(store.clone(), FlakyHandler::failing(2), fast_config());

        let mut statuses = vec![store.get(id).await.unwrap().unwrap().status];
        for _ in 0..3 {
            assert_eq!(worker.run_once().await.unwrap(), 1);
            statuses.push(store.get(id).await.unwrap().unwrap().status);
        }

        assert_eq!(
            statuses,
            vec![
                OutboxStatus::Pending,
                OutboxStatus::Retrying,
                OutboxStatus::Retrying,
                OutboxStatus::Sent,
            ]
        );
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.last_error.as_deref(), Some("Transport error: attempt 2 refused"));
    }

    #[tokio::test]
    async fn exhausting_retries_marks_failed() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let config = WorkerConfig {
            retry_limit: 3,
            ..fast_config()
        };
        let worker = OutboxWorker::new(store.clone(), FlakyHandler::failing(usize::MAX), config);

        for _ in 0..3 {
            worker.run_once().await.unwrap();
        }
        // Terminal: not picked up again
        assert_eq!(worker.run_once().await.unwrap(), 0);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 3);
        assert!(row.last_error.unwrap().contains("attempt 3 refused"));
    }

    #[tokio::test]
    async fn one_failing_row_does_not_affect_the_others() {
        let store = InMemoryOutboxStore::new();
        let a = enqueue(&store, serde_json::json!({ "poison": false })).await;
        let b = enqueue(&store, serde_json::json!({ "poison": true })).await;
        let c = enqueue(&store, serde_json::json!({ "poison": false })).await;
        let worker = OutboxWorker::new(store.clone(), PoisonHandler, fast_config());

        assert_eq!(worker.run_once().await.unwrap(), 3);

        assert_eq!(store.get(a).await.unwrap().unwrap().status, OutboxStatus::Sent);
        assert_eq!(store.get(b).await.unwrap().unwrap().status, OutboxStatus::Retrying);
        assert_eq!(store.get(c).await.unwrap().unwrap().status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn retrying_row_is_not_picked_before_backoff() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let config = WorkerConfig {
            base_backoff: Duration::from_secs(600),
            ..fast_config()
        };
        let worker = OutboxWorker::new(store.clone(), FlakyHandler::failing(1), config);

        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Retrying);
    }

    #[tokio::test]
    async fn concurrent_workers_never_deliver_the_same_row_twice() {
        let store = InMemoryOutboxStore::new();
        for n in 0..40 {
            enqueue(&store, serde_json::json!({ "n": n })).await;
        }
        let handler = Arc::new(RecordingHandler::default());
        let config = WorkerConfig {
            batch_size: 3,
            ..fast_config()
        };
        let workers: Vec<_> = (0..4)
            .map(|_| Arc::new(OutboxWorker::new(store.clone(), handler.clone(), config)))
            .collect();

        let tasks: Vec<_> = workers
            .iter()
            .cloned()
            .map(|worker| {
                tokio::spawn(async move { while worker.run_once().await.unwrap() > 0 {} })
            })
            .collect();
        futures_util::future::join_all(tasks).await;

        let delivered = handler.delivered.lock().unwrap().clone();
        let unique: HashSet<_> = delivered.iter().copied().collect();
        assert_eq!(delivered.len(), 40);
        assert_eq!(unique.len(), 40);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn already_applied_step_is_skipped() {
        let store = InMemoryOutboxStore::new();
        let saga_id = SagaId::new();
        let applied = StepId::new();
        let fresh = StepId::new();
        let skipped = enqueue(
            &store,
            serde_json::json!({ "sagaId": saga_id.to_string(), "sagaStepId": applied.to_string() }),
        )
        .await;
        let delivered = enqueue(
            &store,
            serde_json::json!({ "sagaId": saga_id.to_string(), "sagaStepId": fresh.to_string() }),
        )
        .await;

        let handler = Arc::new(RecordingHandler::default());
        let worker = OutboxWorker::new(store.clone(), handler.clone(), fast_config())
            .with_applied_steps(Arc::new(FixedAppliedSteps(HashSet::from([applied]))));

        worker.run_once().await.unwrap();

        assert_eq!(handler.delivered.lock().unwrap().clone(), vec![delivered.as_i64()]);
        assert_eq!(store.get(skipped).await.unwrap().unwrap().status, OutboxStatus::Sent);
        assert_eq!(store.get(delivered).await.unwrap().unwrap().status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn failing_applied_check_falls_back_to_delivery() {
        let store = InMemoryOutboxStore::new();
        enqueue(
            &store,
            serde_json::json!({
                "sagaId": SagaId::new().to_string(),
                "sagaStepId": StepId::new().to_string(),
            }),
        )
        .await;
        let handler = Arc::new(RecordingHandler::default());
        let worker = OutboxWorker::new(store, handler.clone(), fast_config())
            .with_applied_steps(Arc::new(BrokenAppliedSteps));

        worker.run_once().await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_loop_delivers_and_stops() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let worker = Arc::new(OutboxWorker::new(
            store.clone(),
            RecordingHandler::default(),
            fast_config(),
        ));

        let runner = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };

        for _ in 0..100 {
            if store.get(id).await.unwrap().unwrap().status == OutboxStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("worker did not stop")
            .unwrap();

        assert!(worker.is_stopped());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn stopped_worker_does_not_poll() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let worker = OutboxWorker::new(store.clone(), RecordingHandler::default(), fast_config());

        worker.stop();
        worker.run().await;

        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Pending);
    }

    /// Holds every delivery for `delay`, then refuses it.
    struct SlowRefusingHandler {
        delay: Duration,
    }

    #[async_trait]
    impl DeliveryHandler for SlowRefusingHandler {
        async fn deliver(&self, _message: &OutboxMessage) -> std::result::Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            Err(DeliveryError::Transport("timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn stale_worker_cannot_overwrite_a_sent_row() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, serde_json::json!({})).await;
        let config = WorkerConfig {
            claim_timeout: Duration::from_millis(50),
            ..fast_config()
        };

        // The slow worker claims first and is still delivering when its claim expires
        let slow = OutboxWorker::new(
            store.clone(),
            SlowRefusingHandler {
                delay: Duration::from_millis(300),
            },
            config,
        );
        let slow_cycle = tokio::spawn(async move { slow.run_once().await });
        tokio::time::sleep(Duration::from_millis(120)).await;

        let handler = Arc::new(RecordingHandler::default());
        let fast = OutboxWorker::new(store.clone(), handler.clone(), config);
        assert_eq!(fast.run_once().await.unwrap(), 1);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, OutboxStatus::Sent);

        // The late failure is dropped instead of reverting SENT
        assert_eq!(slow_cycle.await.unwrap().unwrap(), 1);
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Sent);
        assert_eq!(row.retry_count, 0);
        assert!(row.last_error.is_none());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unroutable_topic_ends_failed() {
        let store = InMemoryOutboxStore::new();
        let id = store
            .insert(NewOutboxMessage::new("shipping.dispatch", serde_json::json!({})))
            .await
            .unwrap();
        let router = TopicRouter::new().route("payment.charge", Arc::new(RecordingHandler::default()));
        let config = WorkerConfig {
            retry_limit: 3,
            ..fast_config()
        };
        let worker = OutboxWorker::new(store.clone(), router, config);

        for _ in 0..3 {
            assert_eq!(worker.run_once().await.unwrap(), 1);
        }
        assert_eq!(worker.run_once().await.unwrap(), 0);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 3);
        assert!(
            row.last_error
                .unwrap()
                .contains("No delivery handler registered for topic 'shipping.dispatch'")
        );
    }
}

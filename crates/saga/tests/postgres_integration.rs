//! PostgreSQL integration tests for the saga log and the saga flow over the
//! PostgreSQL outbox and processed-events tables.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{SagaId, StepId};
use idempotency::PostgresIdempotencyGuard;
use outbox::{OutboxPublisher, OutboxStatus, OutboxStore, PostgresOutboxStore};
use saga::{
    EntryType, InventoryParticipant, NewSagaLogEntry, ParticipantOutcome, PaymentParticipant,
    PostgresSagaLog, SagaLog, SagaOrchestrator, SagaState, StepRequest, StepStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            outbox::run_migrations(&temp_pool).await.unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_log, outbox, processed_events RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

type Orchestrator = SagaOrchestrator<PostgresSagaLog, OutboxPublisher<PostgresOutboxStore>>;

fn orchestrator(pool: &PgPool) -> Arc<Orchestrator> {
    Arc::new(SagaOrchestrator::new(
        PostgresSagaLog::new(pool.clone()),
        OutboxPublisher::new(PostgresOutboxStore::new(pool.clone())),
    ))
}

#[tokio::test]
#[serial]
async fn append_and_read_back_in_order() {
    let pool = get_test_pool().await;
    let log = PostgresSagaLog::new(pool);
    let saga_id = SagaId::new();
    let step_id = StepId::new();

    let first = log
        .append(NewSagaLogEntry::command(
            saga_id,
            "start",
            None,
            serde_json::json!({ "items": ["SKU1"], "amount": 100 }),
        ))
        .await
        .unwrap();
    let second = log
        .append(
            NewSagaLogEntry::event(
                saga_id,
                "reserve_inventory",
                Some(step_id),
                serde_json::json!({ "success": false }),
                StepStatus::Failed,
            )
            .with_error("forced"),
        )
        .await
        .unwrap();
    log.append(NewSagaLogEntry::command(SagaId::new(), "start", None, serde_json::json!({})))
        .await
        .unwrap();

    let entries = log.entries(saga_id).await.unwrap();
    assert_eq!(entries, vec![first.clone(), second.clone()]);
    assert!(first.id < second.id);
    assert_eq!(second.entry_type, EntryType::Event);
    assert_eq!(second.step_id, Some(step_id));
    assert_eq!(second.error.as_deref(), Some("forced"));
    assert!(log.entries(SagaId::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn step_applied_requires_confirming_event() {
    let pool = get_test_pool().await;
    let log = PostgresSagaLog::new(pool);
    let saga_id = SagaId::new();
    let step_id = StepId::new();

    log.append(NewSagaLogEntry::command(
        saga_id,
        "release_inventory",
        Some(step_id),
        serde_json::json!({}),
    ))
    .await
    .unwrap();
    assert!(!SagaLog::is_step_applied(&log, saga_id, step_id).await.unwrap());

    log.append(NewSagaLogEntry::event(
        saga_id,
        "release_inventory",
        Some(step_id),
        serde_json::json!({ "released": true }),
        StepStatus::Compensated,
    ))
    .await
    .unwrap();
    assert!(SagaLog::is_step_applied(&log, saga_id, step_id).await.unwrap());
    assert!(!SagaLog::is_step_applied(&log, saga_id, StepId::new()).await.unwrap());
}

#[tokio::test]
#[serial]
async fn reserve_then_declined_charge_compensates() {
    let pool = get_test_pool().await;
    let orch = orchestrator(&pool);
    let inventory = InventoryParticipant::new(orch.clone(), PostgresIdempotencyGuard::new(pool.clone()));
    let payment = PaymentParticipant::new(orch.clone(), PostgresIdempotencyGuard::new(pool.clone()));
    let outbox = PostgresOutboxStore::new(pool.clone());

    let saga_id = orch
        .start(None, vec!["SKU1".to_string()], 100.0)
        .await
        .unwrap();
    let reserve_step = orch
        .reserve_inventory(saga_id, &["SKU1".to_string()])
        .await
        .unwrap();

    let reserve = StepRequest::new(saga_id, Some(reserve_step));
    assert_eq!(inventory.reserve(&reserve).await.unwrap(), ParticipantOutcome::Applied);
    assert_eq!(inventory.reserve(&reserve).await.unwrap(), ParticipantOutcome::Duplicate);

    let charge_row = outbox
        .list_by_status(OutboxStatus::Pending)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.topic == "payment.charge")
        .unwrap();
    assert_eq!(charge_row.payload["amount"], 100.0);
    let (_, charge_step) = charge_row.saga_step().unwrap();

    let outcome = payment
        .charge(&StepRequest::new(saga_id, Some(charge_step)).failing())
        .await
        .unwrap();
    assert!(!outcome.is_success());

    let release_row = outbox
        .list_by_status(OutboxStatus::Pending)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.topic == "inventory.release")
        .unwrap();
    let (_, release_step) = release_row.saga_step().unwrap();
    inventory
        .release(&StepRequest::new(saga_id, Some(release_step)))
        .await
        .unwrap();

    let steps: Vec<_> = orch
        .log(saga_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.step, e.entry_type, e.status))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("start".to_string(), EntryType::Command, StepStatus::Pending),
            ("reserve_inventory".to_string(), EntryType::Command, StepStatus::Pending),
            ("reserve_inventory".to_string(), EntryType::Event, StepStatus::Confirmed),
            ("charge_payment".to_string(), EntryType::Command, StepStatus::Pending),
            ("charge_payment".to_string(), EntryType::Event, StepStatus::Failed),
            ("release_inventory".to_string(), EntryType::Command, StepStatus::Pending),
            ("release_inventory".to_string(), EntryType::Event, StepStatus::Compensated),
        ]
    );

    let saga = orch.instance(saga_id).await.unwrap().unwrap();
    assert_eq!(saga.state(), SagaState::Failed);
    assert_eq!(saga.items(), ["SKU1"]);

    let processed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(processed, 3);
}

//! HTTP API server for the order fulfillment saga.
//!
//! Exposes the saga endpoints, the mock inventory and payment participants
//! the outbox delivers to, and the health and Prometheus metrics endpoints.
//! Outbox workers run alongside the server under a [`WorkerPool`].

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use idempotency::{IdempotencyGuard, InMemoryIdempotencyGuard, PostgresIdempotencyGuard};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{
    AppliedSteps, DeliveryHandler, HttpDeliveryHandler, InMemoryOutboxStore, OutboxPublisher,
    OutboxStore, OutboxWorker, PostgresOutboxStore, TopicRouter, WorkerConfig, WorkerPool,
};
use saga::order_fulfillment::{
    TOPIC_INVENTORY_RELEASE, TOPIC_INVENTORY_RESERVE, TOPIC_PAYMENT_CHARGE,
};
use saga::{
    InMemorySagaLog, InventoryParticipant, PaymentParticipant, PostgresSagaLog, SagaLog,
    SagaOrchestrator,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Publisher over whichever outbox store the process runs on.
pub type Publisher = OutboxPublisher<Arc<dyn OutboxStore>>;

pub type Orchestrator = SagaOrchestrator<Arc<dyn SagaLog>, Publisher>;

pub type Inventory = InventoryParticipant<Arc<dyn SagaLog>, Publisher, Arc<dyn IdempotencyGuard>>;

pub type Payment = PaymentParticipant<Arc<dyn SagaLog>, Publisher, Arc<dyn IdempotencyGuard>>;

/// Participant endpoint for each saga topic, relative to the base URL.
pub const PARTICIPANT_ROUTES: [(&str, &str); 3] = [
    (TOPIC_INVENTORY_RESERVE, "/inventory/reserve"),
    (TOPIC_PAYMENT_CHARGE, "/payment/charge"),
    (TOPIC_INVENTORY_RELEASE, "/inventory/release"),
];

/// The storage backends shared by the HTTP handlers and the outbox workers.
#[derive(Clone)]
pub struct Stores {
    pub outbox: Arc<dyn OutboxStore>,
    pub saga_log: Arc<dyn SagaLog>,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub applied_steps: Arc<dyn AppliedSteps>,
}

impl Stores {
    /// Process-local stores; nothing survives a restart.
    pub fn in_memory() -> Self {
        let saga_log = InMemorySagaLog::new();
        Self {
            outbox: Arc::new(InMemoryOutboxStore::new()),
            saga_log: Arc::new(saga_log.clone()),
            guard: Arc::new(InMemoryIdempotencyGuard::new()),
            applied_steps: Arc::new(saga_log),
        }
    }

    /// PostgreSQL-backed stores sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        let saga_log = PostgresSagaLog::new(pool.clone());
        Self {
            outbox: Arc::new(PostgresOutboxStore::new(pool.clone())),
            saga_log: Arc::new(saga_log.clone()),
            guard: Arc::new(PostgresIdempotencyGuard::new(pool)),
            applied_steps: Arc::new(saga_log),
        }
    }
}

/// Shared state for the saga and participant handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub inventory: Inventory,
    pub payment: Payment,
}

/// Wires the orchestrator and the mock participants over `stores`.
pub fn create_state(stores: &Stores) -> Arc<AppState> {
    let orchestrator = Arc::new(SagaOrchestrator::new(
        stores.saga_log.clone(),
        OutboxPublisher::new(stores.outbox.clone()),
    ));

    Arc::new(AppState {
        inventory: InventoryParticipant::new(orchestrator.clone(), stores.guard.clone()),
        payment: PaymentParticipant::new(orchestrator.clone(), stores.guard.clone()),
        orchestrator,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/saga/orders", post(routes::sagas::start))
        .route("/saga/orders/{id}", get(routes::sagas::get))
        .route("/inventory/reserve", post(routes::participants::reserve))
        .route("/inventory/release", post(routes::participants::release))
        .route("/payment/charge", post(routes::participants::charge))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Routes each saga topic to its participant endpoint under `base_url`.
pub fn delivery_router(client: reqwest::Client, base_url: &str, timeout: Duration) -> TopicRouter {
    PARTICIPANT_ROUTES
        .iter()
        .fold(TopicRouter::new(), |router, (topic, path)| {
            let handler = HttpDeliveryHandler::new(client.clone(), format!("{base_url}{path}"))
                .with_timeout(timeout);
            router.route(*topic, Arc::new(handler))
        })
}

/// Adds `count` supervised outbox workers to `workers`.
///
/// Every worker gets its own child of the pool token and skips saga
/// commands whose step is already applied.
pub fn spawn_outbox_workers<H>(
    workers: &mut WorkerPool,
    stores: &Stores,
    handler: H,
    config: WorkerConfig,
    count: usize,
) where
    H: DeliveryHandler + Clone + 'static,
{
    for i in 0..count {
        let store = stores.outbox.clone();
        let applied_steps = stores.applied_steps.clone();
        let handler = handler.clone();
        let token = workers.token().child_token();

        workers.spawn(format!("outbox-worker-{i}"), move || {
            let worker = OutboxWorker::new(store.clone(), handler.clone(), config)
                .with_applied_steps(applied_steps.clone())
                .with_shutdown(token.clone());
            async move { worker.run().await }
        });
    }
}

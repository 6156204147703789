//! API server entry point.

use api::Stores;
use api::config::{Config, LogFormat};
use outbox::WorkerPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect the database, or fall back to in-memory stores
    let pool = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            outbox::run_migrations(&pool)
                .await
                .expect("failed to run migrations");
            tracing::info!(max_connections = config.db_max_connections, "connected to PostgreSQL");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            None
        }
    };
    let stores = match &pool {
        Some(pool) => Stores::postgres(pool.clone()),
        None => Stores::in_memory(),
    };

    // 4. Start the outbox workers
    let base_url = config.bff_base_url();
    let router = api::delivery_router(reqwest::Client::new(), &base_url, config.delivery_timeout);
    let mut workers = WorkerPool::new(CancellationToken::new());
    api::spawn_outbox_workers(
        &mut workers,
        &stores,
        router,
        config.worker_config(),
        config.workers,
    );
    tracing::info!(
        workers = workers.len(),
        %base_url,
        delivery_timeout_ms = config.delivery_timeout.as_millis() as u64,
        claim_timeout_ms = config.claim_timeout.as_millis() as u64,
        "outbox workers started"
    );

    // 5. Build the application
    let app = api::create_app(api::create_state(&stores), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Drain workers before closing the pool they use
    workers.shutdown().await;
    if let Some(pool) = pool {
        pool.close().await;
    }

    tracing::info!("server shut down gracefully");
}

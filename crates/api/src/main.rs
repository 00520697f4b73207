//! API server entry point.

use std::sync::Arc;

use api::Config;
use domain::FakePaymentGateway;
use outbox::{InMemoryStreamBroker, OutboxConfig, OutboxRelay};
use saga::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
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

/// Opens the saga ledger store: PostgreSQL when `DATABASE_URL` is set.
async fn ledger_store(config: &Config) -> Arc<dyn LedgerStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, saga ledgers will not survive a restart");
        return Arc::new(InMemoryLedgerStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .expect("failed to connect to database");
    let store = PostgresLedgerStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("saga ledgers stored in PostgreSQL");
    Arc::new(store)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire services and start the outbox relay
    let ledgers = ledger_store(&config).await;
    let state = api::create_state_with_ledgers(&config, FakePaymentGateway::default(), ledgers);
    let relay = OutboxRelay::new(
        state.outbox.clone(),
        InMemoryStreamBroker::new(),
        OutboxConfig::default(),
    )
    .spawn();

    // 4. Compensate sagas an earlier run left unfinished
    match state.orchestrator.recover_unfinished().await {
        Ok(outcomes) if !outcomes.is_empty() => {
            tracing::warn!(recovered = outcomes.len(), "recovered unfinished sagas");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "saga recovery failed"),
    }

    // 5. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    state.shutdown();
    relay.shutdown().await;
    tracing::info!("server shut down gracefully");
}

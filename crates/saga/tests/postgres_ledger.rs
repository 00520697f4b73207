//! PostgreSQL ledger store integration tests
//!
//! These tests share one PostgreSQL container and truncate the ledger table
//! before each test, so they are serialized.
//!
//! ```bash
//! cargo test -p saga --test postgres_ledger
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, Money, ProductId, SagaId};
use coordination::{ConcurrencyLimiter, LeaseMutex, LimiterConfig, SemaphoreRegistry};
use domain::{
    CreateOrder, FakePaymentGateway, InventoryService, OrderService, OrderStatus, PaymentService,
    ReservationStatus,
};
use outbox::InMemoryOutboxStore;
use saga::{
    InventoryParticipant, LedgerStore, OrderParticipant, OrderSagaRequest, PostgresLedgerStore,
    SagaLedger, SagaOrchestrator, SagaState, SagaStep,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
            sqlx::raw_sql(include_str!("../../../migrations/002_create_saga_ledgers.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_ledgers")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedgerStore::new(pool)
}

fn request(quantity: u32) -> OrderSagaRequest {
    OrderSagaRequest::new(
        CustomerId::new(),
        ProductId::new("SKU-1"),
        quantity,
        Money::from_cents(2000).multiply(quantity),
        "CARD",
    )
}

type Orchestrator = SagaOrchestrator<
    OrderService,
    InventoryService<LeaseMutex>,
    PaymentService<FakePaymentGateway>,
    PostgresLedgerStore,
>;

struct Services {
    orders: OrderService,
    inventory: InventoryService<LeaseMutex>,
    payments: PaymentService<FakePaymentGateway>,
}

async fn services(stock: u32) -> Services {
    let outbox = InMemoryOutboxStore::new();
    let inventory = InventoryService::new(LeaseMutex::default(), outbox.clone());
    inventory
        .register_product(ProductId::new("SKU-1"), stock)
        .await
        .unwrap();
    let limiter =
        ConcurrencyLimiter::initialize(&SemaphoreRegistry::new(), &LimiterConfig::default());
    Services {
        orders: OrderService::new(outbox.clone()),
        inventory,
        payments: PaymentService::new(FakePaymentGateway::instant(), limiter, outbox),
    }
}

fn orchestrator(services: &Services, store: PostgresLedgerStore) -> Orchestrator {
    SagaOrchestrator::new(
        services.orders.clone(),
        services.inventory.clone(),
        services.payments.clone(),
        store,
    )
}

#[tokio::test]
#[serial]
async fn save_and_get_round_trip() {
    let store = get_test_store().await;
    let mut ledger = SagaLedger::start(SagaId::new("SAGA-ROUND"), request(2));
    ledger.record(SagaStep::CreateOrder);
    ledger.record(SagaStep::ReserveStock);

    store.save(&ledger).await.unwrap();

    let loaded = store.get(&ledger.saga_id).await.unwrap().unwrap();
    assert_eq!(loaded.saga_id, ledger.saga_id);
    assert_eq!(loaded.request, ledger.request);
    assert_eq!(loaded.state, SagaState::Running);
    assert_eq!(
        loaded.completed_steps,
        vec![SagaStep::CreateOrder, SagaStep::ReserveStock]
    );
}

#[tokio::test]
#[serial]
async fn get_unknown_saga_returns_none() {
    let store = get_test_store().await;
    assert!(store.get(&SagaId::new("SAGA-NOPE")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn save_replaces_the_previous_ledger() {
    let store = get_test_store().await;
    let mut ledger = SagaLedger::start(SagaId::new("SAGA-UPSERT"), request(1));
    store.save(&ledger).await.unwrap();

    for step in SagaStep::ALL {
        ledger.record(step);
    }
    ledger.transition(SagaState::Completed);
    store.save(&ledger).await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saga_ledgers")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let loaded = store.get(&ledger.saga_id).await.unwrap().unwrap();
    assert_eq!(loaded.state, SagaState::Completed);
    assert_eq!(loaded.completed_steps.len(), SagaStep::ALL.len());
    assert!(
        store
            .find_by_state(SagaState::Running)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[serial]
async fn find_by_state_filters_and_orders_by_start() {
    let store = get_test_store().await;
    let base = Utc::now();
    for (i, id) in ["SAGA-C", "SAGA-A", "SAGA-B"].into_iter().enumerate() {
        let mut ledger = SagaLedger::start(SagaId::new(id), request(1));
        ledger.started_at = base - Duration::seconds(30 - 10 * i as i64);
        store.save(&ledger).await.unwrap();
    }
    let mut done = SagaLedger::start(SagaId::new("SAGA-DONE"), request(1));
    done.started_at = base - Duration::seconds(60);
    done.transition(SagaState::Failed);
    store.save(&done).await.unwrap();

    let running = store.find_by_state(SagaState::Running).await.unwrap();
    let ids: Vec<&str> = running.iter().map(|l| l.saga_id.as_str()).collect();
    assert_eq!(ids, vec!["SAGA-C", "SAGA-A", "SAGA-B"]);

    let failed = store.find_by_state(SagaState::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].saga_id.as_str(), "SAGA-DONE");
}

#[tokio::test]
#[serial]
async fn executed_saga_is_readable_from_a_fresh_store() {
    let store = get_test_store().await;
    let services = services(10).await;
    let orchestrator = orchestrator(&services, store.clone());

    let outcome = orchestrator.execute(request(3)).await.unwrap();
    assert!(outcome.success);

    let reopened = PostgresLedgerStore::new(store.pool().clone());
    let ledger = reopened.get(&outcome.saga_id).await.unwrap().unwrap();
    assert_eq!(ledger.state, SagaState::Completed);
    assert_eq!(ledger.completed_steps.len(), SagaStep::ALL.len());
    assert_eq!(ledger.order_id, outcome.order_id);
}

#[tokio::test]
#[serial]
async fn restart_compensates_saga_left_running_in_postgres() {
    let store = get_test_store().await;
    let services = services(10).await;
    let saga_id = SagaId::new("SAGA-CRASHED");
    let product = ProductId::new("SKU-1");

    // State left behind by a process that died after reserving stock.
    let order_id = OrderParticipant::create(
        &services.orders,
        CreateOrder::new(
            saga_id.clone(),
            CustomerId::new(),
            product.clone(),
            2,
            Money::from_cents(4000),
        ),
    )
    .await
    .unwrap();
    InventoryParticipant::reserve(&services.inventory, &product, 2, &saga_id)
        .await
        .unwrap();
    let mut ledger = SagaLedger::start(saga_id.clone(), request(2));
    ledger.order_id = Some(order_id);
    ledger.record(SagaStep::CreateOrder);
    ledger.record(SagaStep::ReserveStock);
    store.save(&ledger).await.unwrap();

    let restarted = orchestrator(&services, PostgresLedgerStore::new(store.pool().clone()));
    let outcomes = restarted.recover_unfinished().await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].error_code.as_deref(), Some("SAGA_INTERRUPTED"));

    let record = services.inventory.get(&product).await.unwrap();
    assert_eq!(record.reserved_quantity, 0);
    assert_eq!(record.status, ReservationStatus::Available);
    assert_eq!(record.hold_count(), 0);
    let order = services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let stored = store.get(&saga_id).await.unwrap().unwrap();
    assert_eq!(stored.state, SagaState::Failed);
    assert!(restarted.recover_unfinished().await.unwrap().is_empty());
}

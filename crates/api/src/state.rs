//! Shared application state and its default in-memory wiring.

use std::sync::Arc;

use coordination::{ConcurrencyLimiter, LeaseMutex, SemaphoreRegistry};
use domain::{FakePaymentGateway, InventoryService, OrderService, PaymentService};
use idempotency::{IdempotencyConfig, Idempotent, InMemoryIdempotencyStore};
use outbox::InMemoryOutboxStore;
use saga::{InMemoryLedgerStore, LedgerStore, SagaOrchestrator};

use crate::config::Config;

/// The orchestrator as wired by this server.
pub type Orchestrator = SagaOrchestrator<
    OrderService,
    InventoryService<LeaseMutex>,
    PaymentService<FakePaymentGateway>,
    Arc<dyn LedgerStore>,
>;

/// State shared by every handler.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub orders: OrderService,
    pub inventory: InventoryService<LeaseMutex>,
    pub payments: PaymentService<FakePaymentGateway>,
    pub outbox: InMemoryOutboxStore,
    /// Saga entry point: a missing key runs the saga unguarded.
    pub saga_requests: Idempotent<InMemoryIdempotencyStore>,
    /// Inventory step endpoints: a key is required.
    pub inventory_requests: Idempotent<InMemoryIdempotencyStore>,
    pub mutex: LeaseMutex,
    pub semaphores: SemaphoreRegistry,
}

impl AppState {
    /// Stops lock renewals and wakes every waiter with an interruption.
    pub fn shutdown(&self) {
        self.mutex.shutdown();
        self.semaphores.shutdown();
    }
}

/// Builds the in-memory state around `gateway`.
pub fn create_state(config: &Config, gateway: FakePaymentGateway) -> Arc<AppState> {
    create_state_with_ledgers(config, gateway, Arc::new(InMemoryLedgerStore::new()))
}

/// Builds the state around `gateway`, keeping saga ledgers in `ledgers`.
pub fn create_state_with_ledgers(
    config: &Config,
    gateway: FakePaymentGateway,
    ledgers: Arc<dyn LedgerStore>,
) -> Arc<AppState> {
    let outbox = InMemoryOutboxStore::new();
    let mutex = LeaseMutex::default();
    let semaphores = SemaphoreRegistry::new();
    let limiter = ConcurrencyLimiter::initialize(&semaphores, &config.gateway_limiter());

    let orders = OrderService::new(outbox.clone());
    let inventory = InventoryService::new(mutex.clone(), outbox.clone())
        .with_lock_wait(config.inventory_lock_wait);
    let payments = PaymentService::new(gateway, limiter, outbox.clone());
    let orchestrator = SagaOrchestrator::new(
        orders.clone(),
        inventory.clone(),
        payments.clone(),
        ledgers,
    );

    let responses = InMemoryIdempotencyStore::new();
    let base = config.idempotency();
    let saga_requests = Idempotent::new(
        responses.clone(),
        IdempotencyConfig {
            prefix: format!("{}:saga", base.prefix),
            ..base.clone()
        }
        .optional(),
    );
    let inventory_requests = Idempotent::new(
        responses,
        IdempotencyConfig {
            prefix: format!("{}:inventory", base.prefix),
            ..base
        },
    );

    Arc::new(AppState {
        orchestrator,
        orders,
        inventory,
        payments,
        outbox,
        saga_requests,
        inventory_requests,
        mutex,
        semaphores,
    })
}

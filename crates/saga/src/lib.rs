//! Saga orchestration for the order flow.
//!
//! The order saga runs these steps against independently committed
//! participants:
//! 1. Create order
//! 2. Reserve stock (takes the product's semantic lock)
//! 3. Create payment
//! 4. Approve payment through the gateway
//! 5. Confirm order
//! 6. Confirm stock (turns the reservation into a sale)
//! 7. Confirm payment
//!
//! Each successful step is written to the [`SagaLedger`]. If any step
//! fails, completed steps are compensated in reverse order and the saga
//! reports failure. Ledgers left unfinished by a crash are compensated by
//! [`SagaOrchestrator::recover_unfinished`].

pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod postgres;
pub mod services;
pub mod state;

pub use coordinator::{CompensationPolicy, SagaOrchestrator, SagaOutcome};
pub use error::{Result, SagaError};
pub use ledger::{
    CompensationFailure, CompensationStep, InMemoryLedgerStore, LedgerStore, OrderSagaRequest,
    SagaLedger, SagaStep, StepFailure,
};
pub use postgres::PostgresLedgerStore;
pub use services::{InventoryParticipant, OrderParticipant, PaymentParticipant};
pub use state::SagaState;

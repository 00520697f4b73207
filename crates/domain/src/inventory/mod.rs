//! Inventory with per-product semantic locks.
//!
//! A saga reserves stock under its own saga id, then either confirms the
//! reservation (stock is sold) or cancels it (stock returns). While a
//! reservation is open no other saga can reserve the same product; it fails
//! fast with [`DomainError::LockedByOtherSaga`](crate::DomainError).

mod events;
mod record;
mod service;

pub use events::{InventoryEvent, ProductRegisteredData, StockAddedData, StockMovementData};
pub use record::{
    CancelOutcome, HoldStage, InventoryRecord, ReservationStatus, SagaHold, Settlement,
    StockOperation,
};
pub use service::{DEFAULT_LOCK_WAIT, InventoryService, lock_key};

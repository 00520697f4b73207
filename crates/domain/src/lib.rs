//! Services that saga steps call.
//!
//! - [`OrderService`]: orders created, confirmed and cancelled by sagas
//! - [`InventoryService`]: stock guarded by a per-product mutex and a
//!   semantic lock owned by one saga at a time
//! - [`PaymentService`]: payments charged and refunded through a
//!   [`PaymentGateway`] behind a concurrency limiter
//!
//! Every state change is committed together with an outbox record describing
//! it, so an event exists if and only if its change does.

pub mod error;
pub mod event;
pub mod inventory;
pub mod order;
pub mod payment;

pub use error::{DomainError, Result};
pub use event::DomainEvent;
pub use inventory::{InventoryEvent, InventoryRecord, InventoryService, ReservationStatus};
pub use order::{CreateOrder, Order, OrderEvent, OrderService, OrderStatus};
pub use payment::{
    CreatePayment, FakePaymentGateway, GatewayDecline, Payment, PaymentEvent, PaymentGateway,
    PaymentService, PaymentStatus,
};

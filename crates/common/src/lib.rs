//! Shared types for the order saga system.
//!
//! Identifiers are newtypes so a saga id can never be passed where an order id
//! is expected. [`ErrorKind`] is the error taxonomy every crate maps into.

pub mod error;
pub mod money;
pub mod types;

pub use error::ErrorKind;
pub use money::Money;
pub use types::{CustomerId, OrderId, PaymentId, ProductId, SagaId};

//! Domain error types.

use common::{ErrorKind, OrderId, PaymentId, ProductId, SagaId};
use coordination::CoordinationError;
use outbox::OutboxError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Another saga holds the semantic lock on the product.
    #[error("Product {product_id} is locked by saga {owner}, requested by {requested_by}")]
    LockedByOtherSaga {
        product_id: ProductId,
        owner: SagaId,
        requested_by: SagaId,
    },

    /// A saga tried to settle a reservation it does not own.
    #[error("Saga {requested_by} does not own the reservation on {product_id} (owner {owner})")]
    InvalidOwnership {
        product_id: ProductId,
        owner: SagaId,
        requested_by: SagaId,
    },

    /// Not enough unreserved stock.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Confirming more than is reserved. Indicates a caller bug.
    #[error("Cannot confirm {requested} of {product_id}: only {reserved} reserved")]
    ReservationUnderflow {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// The saga has no reservation on the product that the action applies to.
    #[error("Saga {saga_id} has no reservation on {product_id} to {action}")]
    ReservationNotFound {
        product_id: ProductId,
        saga_id: SagaId,
        action: &'static str,
    },

    /// The record changed between read and write.
    #[error("Version conflict on {product_id}: expected {expected}, found {actual}")]
    VersionConflict {
        product_id: ProductId,
        expected: u64,
        actual: u64,
    },

    #[error("Quantity must be positive")]
    InvalidQuantity,

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(common::Money),

    #[error("Product already registered: {0}")]
    ProductAlreadyExists(ProductId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The entity's current status does not allow the action.
    #[error("Cannot {action} {entity} {id} in status {status}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        status: &'static str,
        action: &'static str,
    },

    /// The payment gateway refused the charge.
    #[error("Payment {payment_id} declined: [{code}] {message}")]
    PaymentDeclined {
        payment_id: PaymentId,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl DomainError {
    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::LockedByOtherSaga { .. }
            | DomainError::InvalidOwnership { .. }
            | DomainError::ReservationUnderflow { .. }
            | DomainError::VersionConflict { .. }
            | DomainError::ProductAlreadyExists(_)
            | DomainError::InvalidStateTransition { .. } => ErrorKind::ResourceConflict,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientResource,
            DomainError::InvalidQuantity | DomainError::InvalidAmount(_) => ErrorKind::Validation,
            DomainError::ProductNotFound(_)
            | DomainError::ReservationNotFound { .. }
            | DomainError::OrderNotFound(_)
            | DomainError::PaymentNotFound(_) => ErrorKind::NotFound,
            DomainError::PaymentDeclined { .. } => ErrorKind::Infrastructure,
            DomainError::Coordination(e) => e.kind(),
            DomainError::Outbox(e) => e.kind(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::LockedByOtherSaga { .. } => "LOCKED_BY_OTHER_SAGA",
            DomainError::InvalidOwnership { .. } => "INVALID_OWNERSHIP",
            DomainError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            DomainError::ReservationUnderflow { .. } => "RESERVATION_UNDERFLOW",
            DomainError::ReservationNotFound { .. } => "RESERVATION_NOT_FOUND",
            DomainError::VersionConflict { .. } => "VERSION_CONFLICT",
            DomainError::InvalidQuantity => "INVALID_QUANTITY",
            DomainError::InvalidAmount(_) => "INVALID_AMOUNT",
            DomainError::ProductAlreadyExists(_) => "PRODUCT_ALREADY_EXISTS",
            DomainError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            DomainError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            DomainError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            DomainError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            DomainError::PaymentDeclined { .. } => "PAYMENT_FAILED",
            DomainError::Coordination(e) => e.code(),
            DomainError::Outbox(_) => "OUTBOX_ERROR",
        }
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;

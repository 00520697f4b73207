//! Payment commands.

use common::{Money, OrderId, SagaId};

/// Command to open a payment for an order.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    /// One payment per saga.
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub amount: Money,
    /// Free-form method label, e.g. "CARD".
    pub payment_method: String,
}

impl CreatePayment {
    pub fn new(
        saga_id: SagaId,
        order_id: OrderId,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            saga_id,
            order_id,
            amount,
            payment_method: payment_method.into(),
        }
    }
}

//! Order commands.

use common::{CustomerId, Money, ProductId, SagaId};

/// Command to create an order on behalf of a saga.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The saga creating the order. One order per saga.
    pub saga_id: SagaId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
}

impl CreateOrder {
    pub fn new(
        saga_id: SagaId,
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: u32,
        total_amount: Money,
    ) -> Self {
        Self {
            saga_id,
            customer_id,
            product_id,
            quantity,
            total_amount,
        }
    }
}

//! Order participant.

use async_trait::async_trait;
use common::OrderId;
use domain::{CreateOrder, OrderService};

/// Order operations a saga needs.
#[async_trait]
pub trait OrderParticipant: Send + Sync {
    /// Creates the saga's order. Repeating the call returns the same id.
    async fn create(&self, cmd: CreateOrder) -> domain::Result<OrderId>;

    async fn confirm(&self, order_id: OrderId) -> domain::Result<()>;

    /// Compensation for [`create`](Self::create).
    async fn cancel(&self, order_id: OrderId) -> domain::Result<()>;
}

#[async_trait]
impl OrderParticipant for OrderService {
    async fn create(&self, cmd: CreateOrder) -> domain::Result<OrderId> {
        let order = self.create_order(cmd).await?;
        Ok(order.id)
    }

    async fn confirm(&self, order_id: OrderId) -> domain::Result<()> {
        self.confirm_order(order_id).await.map(|_| ())
    }

    async fn cancel(&self, order_id: OrderId) -> domain::Result<()> {
        self.cancel_order(order_id).await.map(|_| ())
    }
}

//! Order entity.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

use super::{CreateOrder, OrderCreatedData, OrderEvent, OrderStatus, OrderStatusChangedData};

/// An order placed through a saga.
///
/// Transition methods mutate the order and return the event to record, or
/// `None` when the order is already in the requested status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing number, `ORD-` followed by eight characters.
    pub order_number: String,
    pub saga_id: SagaId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates the command and builds a pending order.
    pub fn create(cmd: &CreateOrder, at: DateTime<Utc>) -> Result<(Self, OrderEvent)> {
        if cmd.quantity == 0 {
            return Err(DomainError::InvalidQuantity);
        }
        if !cmd.total_amount.is_positive() {
            return Err(DomainError::InvalidAmount(cmd.total_amount));
        }

        let order = Self {
            id: OrderId::new(),
            order_number: generate_order_number(),
            saga_id: cmd.saga_id.clone(),
            customer_id: cmd.customer_id,
            product_id: cmd.product_id.clone(),
            quantity: cmd.quantity,
            total_amount: cmd.total_amount,
            status: OrderStatus::Pending,
            created_at: at,
            updated_at: at,
        };
        let event = OrderEvent::OrderCreated(OrderCreatedData {
            order_id: order.id,
            order_number: order.order_number.clone(),
            saga_id: order.saga_id.clone(),
            customer_id: order.customer_id,
            product_id: order.product_id.clone(),
            quantity: order.quantity,
            total_amount: order.total_amount,
            created_at: at,
        });
        Ok((order, event))
    }

    pub fn confirm(&mut self, at: DateTime<Utc>) -> Result<Option<OrderEvent>> {
        if self.status == OrderStatus::Confirmed {
            return Ok(None);
        }
        self.ensure(self.status.can_confirm(), "confirm")?;
        self.status = OrderStatus::Confirmed;
        self.updated_at = at;
        Ok(Some(OrderEvent::OrderConfirmed(self.status_changed(at))))
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<Option<OrderEvent>> {
        if self.status == OrderStatus::Completed {
            return Ok(None);
        }
        self.ensure(self.status.can_complete(), "complete")?;
        self.status = OrderStatus::Completed;
        self.updated_at = at;
        Ok(Some(OrderEvent::OrderCompleted(self.status_changed(at))))
    }

    /// Cancels the order. Cancelling a cancelled order changes nothing.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<Option<OrderEvent>> {
        if self.status == OrderStatus::Cancelled {
            return Ok(None);
        }
        self.ensure(self.status.can_cancel(), "cancel")?;
        self.status = OrderStatus::Cancelled;
        self.updated_at = at;
        Ok(Some(OrderEvent::OrderCancelled(self.status_changed(at))))
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<()> {
        if allowed {
            return Ok(());
        }
        Err(DomainError::InvalidStateTransition {
            entity: "order",
            id: self.id.to_string(),
            status: self.status.as_str(),
            action,
        })
    }

    fn status_changed(&self, at: DateTime<Utc>) -> OrderStatusChangedData {
        OrderStatusChangedData {
            order_id: self.id,
            order_number: self.order_number.clone(),
            saga_id: self.saga_id.clone(),
            occurred_at: at,
        }
    }
}

fn generate_order_number() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", simple[..8].to_uppercase())
}

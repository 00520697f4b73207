//! Order domain events.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// Events recorded by the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created by a saga.
    OrderCreated(OrderCreatedData),

    /// Every saga step succeeded.
    OrderConfirmed(OrderStatusChangedData),

    /// Order was fulfilled.
    OrderCompleted(OrderStatusChangedData),

    /// Order was cancelled, usually by compensation.
    OrderCancelled(OrderStatusChangedData),
}

impl OrderEvent {
    fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated(d) => d.order_id,
            OrderEvent::OrderConfirmed(d)
            | OrderEvent::OrderCompleted(d)
            | OrderEvent::OrderCancelled(d) => d.order_id,
        }
    }
}

impl DomainEvent for OrderEvent {
    fn aggregate_type(&self) -> &'static str {
        "order"
    }

    fn aggregate_id(&self) -> String {
        self.order_id().to_string()
    }

    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

/// Data for OrderCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub order_number: String,
    pub saga_id: SagaId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Data for status-only order events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChangedData {
    pub order_id: OrderId,
    pub order_number: String,
    pub saga_id: SagaId,
    pub occurred_at: DateTime<Utc>,
}

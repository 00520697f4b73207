//! Inventory domain events.

use chrono::{DateTime, Utc};
use common::{ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// Events recorded by the inventory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    ProductRegistered(ProductRegisteredData),
    StockAdded(StockAddedData),
    StockReserved(StockMovementData),
    StockReservationConfirmed(StockMovementData),
    StockReservationCancelled(StockMovementData),
}

impl DomainEvent for InventoryEvent {
    fn aggregate_type(&self) -> &'static str {
        "inventory"
    }

    fn aggregate_id(&self) -> String {
        let product_id = match self {
            InventoryEvent::ProductRegistered(d) => &d.product_id,
            InventoryEvent::StockAdded(d) => &d.product_id,
            InventoryEvent::StockReserved(d)
            | InventoryEvent::StockReservationConfirmed(d)
            | InventoryEvent::StockReservationCancelled(d) => &d.product_id,
        };
        product_id.to_string()
    }

    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "ProductRegistered",
            InventoryEvent::StockAdded(_) => "StockAdded",
            InventoryEvent::StockReserved(_) => "StockReserved",
            InventoryEvent::StockReservationConfirmed(_) => "StockReservationConfirmed",
            InventoryEvent::StockReservationCancelled(_) => "StockReservationCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRegisteredData {
    pub product_id: ProductId,
    pub total_quantity: u32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAddedData {
    pub product_id: ProductId,
    pub added: u32,
    pub total_quantity: u32,
    pub added_at: DateTime<Utc>,
}

/// A saga-driven change to reserved stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovementData {
    pub product_id: ProductId,
    pub saga_id: SagaId,
    pub quantity: u32,
    /// Stock left for other sagas after the change.
    pub available_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

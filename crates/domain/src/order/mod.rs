//! Orders created and settled by sagas.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::Order;
pub use commands::CreateOrder;
pub use events::{OrderCreatedData, OrderEvent, OrderStatusChangedData};
pub use service::OrderService;
pub use state::OrderStatus;

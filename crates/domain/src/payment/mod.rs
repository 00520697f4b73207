//! Payments charged through a rate-limited gateway.

mod aggregate;
mod commands;
mod events;
mod gateway;
mod service;
mod state;

pub use aggregate::Payment;
pub use commands::CreatePayment;
pub use events::{
    PaymentApprovedData, PaymentEvent, PaymentFailedData, PaymentRefundFailedData,
    PaymentStatusChangedData,
};
pub use gateway::{FakePaymentGateway, GatewayDecline, PaymentGateway};
pub use service::PaymentService;
pub use state::PaymentStatus;

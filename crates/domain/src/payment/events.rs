//! Payment domain events.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, SagaId};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// Events recorded by the payment service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentApproved(PaymentApprovedData),
    PaymentConfirmed(PaymentStatusChangedData),
    PaymentFailed(PaymentFailedData),
    PaymentRefunded(PaymentStatusChangedData),

    /// The gateway refund did not go through; needs manual follow-up.
    PaymentRefundFailed(PaymentRefundFailedData),
}

impl PaymentEvent {
    fn payment_id(&self) -> PaymentId {
        match self {
            PaymentEvent::PaymentApproved(d) => d.payment_id,
            PaymentEvent::PaymentConfirmed(d) | PaymentEvent::PaymentRefunded(d) => d.payment_id,
            PaymentEvent::PaymentFailed(d) => d.payment_id,
            PaymentEvent::PaymentRefundFailed(d) => d.payment_id,
        }
    }
}

impl DomainEvent for PaymentEvent {
    fn aggregate_type(&self) -> &'static str {
        "payment"
    }

    fn aggregate_id(&self) -> String {
        self.payment_id().to_string()
    }

    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentApproved(_) => "PaymentApproved",
            PaymentEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
            PaymentEvent::PaymentRefundFailed(_) => "PaymentRefundFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentApprovedData {
    pub payment_id: PaymentId,
    pub payment_key: String,
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub amount: Money,
    pub pg_transaction_id: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusChangedData {
    pub payment_id: PaymentId,
    pub payment_key: String,
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundFailedData {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub amount: Money,
    pub pg_transaction_id: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

//! Payment entity.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

use super::{
    CreatePayment, PaymentApprovedData, PaymentEvent, PaymentFailedData, PaymentRefundFailedData,
    PaymentStatus, PaymentStatusChangedData,
};

/// A payment opened by a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Merchant-side key, `PAY-` followed by twelve characters.
    pub payment_key: String,
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub amount: Money,
    pub payment_method: String,
    pub status: PaymentStatus,
    /// Gateway transaction id, set on approval.
    pub pg_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn create(cmd: &CreatePayment, at: DateTime<Utc>) -> Result<Self> {
        if !cmd.amount.is_positive() {
            return Err(DomainError::InvalidAmount(cmd.amount));
        }
        let simple = Uuid::new_v4().simple().to_string();
        Ok(Self {
            id: PaymentId::new(),
            payment_key: format!("PAY-{}", simple[..12].to_uppercase()),
            order_id: cmd.order_id,
            saga_id: cmd.saga_id.clone(),
            amount: cmd.amount,
            payment_method: cmd.payment_method.clone(),
            status: PaymentStatus::Pending,
            pg_transaction_id: None,
            failure_reason: None,
            created_at: at,
            updated_at: at,
        })
    }

    /// Records the gateway's approval.
    pub fn approve(&mut self, pg_transaction_id: String, at: DateTime<Utc>) -> Result<PaymentEvent> {
        self.ensure(self.status.can_approve(), "approve")?;
        self.status = PaymentStatus::Approved;
        self.pg_transaction_id = Some(pg_transaction_id.clone());
        self.updated_at = at;
        Ok(PaymentEvent::PaymentApproved(PaymentApprovedData {
            payment_id: self.id,
            payment_key: self.payment_key.clone(),
            order_id: self.order_id,
            saga_id: self.saga_id.clone(),
            amount: self.amount,
            pg_transaction_id,
            approved_at: at,
        }))
    }

    /// Marks a pending payment as failed.
    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<PaymentEvent> {
        self.ensure(self.status == PaymentStatus::Pending, "fail")?;
        let reason = reason.into();
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.updated_at = at;
        Ok(PaymentEvent::PaymentFailed(PaymentFailedData {
            payment_id: self.id,
            order_id: self.order_id,
            saga_id: self.saga_id.clone(),
            reason,
            failed_at: at,
        }))
    }

    pub fn confirm(&mut self, at: DateTime<Utc>) -> Result<Option<PaymentEvent>> {
        if self.status == PaymentStatus::Confirmed {
            return Ok(None);
        }
        self.ensure(self.status.can_confirm(), "confirm")?;
        self.status = PaymentStatus::Confirmed;
        self.updated_at = at;
        Ok(Some(PaymentEvent::PaymentConfirmed(self.status_changed(at))))
    }

    /// Marks an approved or confirmed payment as refunded.
    pub fn refund(&mut self, at: DateTime<Utc>) -> Result<PaymentEvent> {
        self.ensure(self.status.can_refund(), "refund")?;
        self.status = PaymentStatus::Refunded;
        self.updated_at = at;
        Ok(PaymentEvent::PaymentRefunded(self.status_changed(at)))
    }

    /// Event noting that the gateway did not return the money.
    pub fn refund_failed(&self, reason: impl Into<String>, at: DateTime<Utc>) -> PaymentEvent {
        PaymentEvent::PaymentRefundFailed(PaymentRefundFailedData {
            payment_id: self.id,
            order_id: self.order_id,
            saga_id: self.saga_id.clone(),
            amount: self.amount,
            pg_transaction_id: self.pg_transaction_id.clone().unwrap_or_default(),
            reason: reason.into(),
            failed_at: at,
        })
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<()> {
        if allowed {
            return Ok(());
        }
        Err(DomainError::InvalidStateTransition {
            entity: "payment",
            id: self.id.to_string(),
            status: self.status.as_str(),
            action,
        })
    }

    fn status_changed(&self, at: DateTime<Utc>) -> PaymentStatusChangedData {
        PaymentStatusChangedData {
            payment_id: self.id,
            payment_key: self.payment_key.clone(),
            order_id: self.order_id,
            saga_id: self.saga_id.clone(),
            amount: self.amount,
            occurred_at: at,
        }
    }
}

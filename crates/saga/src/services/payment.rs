//! Payment participant.

use async_trait::async_trait;
use common::PaymentId;
use domain::{CreatePayment, PaymentGateway, PaymentService};

/// Payment operations a saga needs.
#[async_trait]
pub trait PaymentParticipant: Send + Sync {
    /// Opens the saga's payment. Repeating the call returns the same id.
    async fn create(&self, cmd: CreatePayment) -> domain::Result<PaymentId>;

    /// Authorizes the payment with the gateway.
    async fn approve(&self, payment_id: PaymentId) -> domain::Result<()>;

    async fn confirm(&self, payment_id: PaymentId) -> domain::Result<()>;

    /// Compensation for [`create`](Self::create) and
    /// [`approve`](Self::approve).
    async fn refund(&self, payment_id: PaymentId) -> domain::Result<()>;
}

#[async_trait]
impl<G: PaymentGateway> PaymentParticipant for PaymentService<G> {
    async fn create(&self, cmd: CreatePayment) -> domain::Result<PaymentId> {
        let payment = self.create_payment(cmd).await?;
        Ok(payment.id)
    }

    async fn approve(&self, payment_id: PaymentId) -> domain::Result<()> {
        self.approve_payment(payment_id).await.map(|_| ())
    }

    async fn confirm(&self, payment_id: PaymentId) -> domain::Result<()> {
        self.confirm_payment(payment_id).await.map(|_| ())
    }

    async fn refund(&self, payment_id: PaymentId) -> domain::Result<()> {
        self.refund_payment(payment_id).await.map(|_| ())
    }
}

//! Payment service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::{PaymentId, SagaId};
use coordination::ConcurrencyLimiter;
use outbox::InMemoryOutboxStore;
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};
use crate::event::DomainEvent;

use super::{CreatePayment, Payment, PaymentEvent, PaymentGateway, PaymentStatus};

#[derive(Default)]
struct State {
    payments: HashMap<PaymentId, Payment>,
    by_saga: HashMap<SagaId, PaymentId>,
}

impl State {
    fn payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&payment_id)
            .cloned()
            .ok_or(DomainError::PaymentNotFound(payment_id))
    }
}

/// Service for managing payments.
///
/// Every gateway call goes through the [`ConcurrencyLimiter`], so at most its
/// permit count of calls are in flight across the process.
#[derive(Clone)]
pub struct PaymentService<G> {
    state: Arc<RwLock<State>>,
    gateway: G,
    limiter: ConcurrencyLimiter,
    outbox: InMemoryOutboxStore,
}

impl<G: PaymentGateway> PaymentService<G> {
    pub fn new(gateway: G, limiter: ConcurrencyLimiter, outbox: InMemoryOutboxStore) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            gateway,
            limiter,
            outbox,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Opens a pending payment, or returns the one this saga already opened.
    #[tracing::instrument(skip(self), fields(saga_id = %cmd.saga_id))]
    pub async fn create_payment(&self, cmd: CreatePayment) -> Result<Payment> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .by_saga
            .get(&cmd.saga_id)
            .and_then(|id| state.payments.get(id))
        {
            tracing::debug!(payment_id = %existing.id, "payment already created for saga");
            return Ok(existing.clone());
        }

        let payment = Payment::create(&cmd, Utc::now())?;
        state.by_saga.insert(payment.saga_id.clone(), payment.id);
        state.payments.insert(payment.id, payment.clone());
        tracing::info!(payment_id = %payment.id, payment_key = %payment.payment_key, "payment created");
        Ok(payment)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.state.read().await.payment(payment_id)
    }

    /// Looks up the payment a saga opened.
    pub async fn find_by_saga(&self, saga_id: &SagaId) -> Option<Payment> {
        let state = self.state.read().await;
        state
            .by_saga
            .get(saga_id)
            .and_then(|id| state.payments.get(id))
            .cloned()
    }

    /// Charges the payment through the gateway.
    ///
    /// A decline marks the payment failed and returns
    /// [`DomainError::PaymentDeclined`]. If no gateway permit frees up in
    /// time the call fails with `THROTTLED` and the payment stays pending.
    #[tracing::instrument(skip(self))]
    pub async fn approve_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        match payment.status {
            PaymentStatus::Approved | PaymentStatus::Confirmed => return Ok(payment),
            _ if !payment.status.can_approve() => {
                return Err(DomainError::InvalidStateTransition {
                    entity: "payment",
                    id: payment_id.to_string(),
                    status: payment.status.as_str(),
                    action: "approve",
                });
            }
            _ => {}
        }

        let outcome = self
            .limiter
            .run(self.gateway.approve(payment.order_id, payment.amount))
            .await?;

        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?;
        let now = Utc::now();
        match outcome {
            Ok(pg_transaction_id) => {
                let event = payment.approve(pg_transaction_id, now)?;
                let payment = self.commit(&mut state, payment, vec![event]).await?;
                tracing::info!(%payment_id, "payment approved");
                Ok(payment)
            }
            Err(decline) => {
                let event = payment.fail(decline.to_string(), now)?;
                self.commit(&mut state, payment, vec![event]).await?;
                tracing::warn!(%payment_id, code = %decline.code, "payment declined");
                Err(DomainError::PaymentDeclined {
                    payment_id,
                    code: decline.code,
                    message: decline.message,
                })
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?;
        match payment.confirm(Utc::now())? {
            Some(event) => self.commit(&mut state, payment, vec![event]).await,
            None => Ok(payment),
        }
    }

    /// Gives the money back.
    ///
    /// The payment always ends up `Refunded` (or `Failed` if it was never
    /// approved). When the gateway or the limiter refuses the refund, a
    /// `PaymentRefundFailed` event is committed alongside so the money can
    /// be returned by hand. Refunding a refunded or failed payment is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn refund_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        match payment.status {
            PaymentStatus::Refunded | PaymentStatus::Failed => {
                tracing::debug!(%payment_id, status = %payment.status, "nothing to refund");
                return Ok(payment);
            }
            PaymentStatus::Pending => {
                let mut state = self.state.write().await;
                let mut payment = state.payment(payment_id)?;
                if payment.status != PaymentStatus::Pending {
                    return Ok(payment);
                }
                let event = payment.fail("cancelled before approval", Utc::now())?;
                return self.commit(&mut state, payment, vec![event]).await;
            }
            PaymentStatus::Approved | PaymentStatus::Confirmed => {}
        }

        let gateway_failure = match &payment.pg_transaction_id {
            Some(pg_transaction_id) => match self
                .limiter
                .run(self.gateway.refund(pg_transaction_id, payment.amount))
                .await
            {
                Ok(Ok(())) => None,
                Ok(Err(decline)) => Some(decline.to_string()),
                Err(e) => Some(e.to_string()),
            },
            None => None,
        };

        let mut state = self.state.write().await;
        let mut payment = state.payment(payment_id)?;
        if !payment.status.can_refund() {
            return Ok(payment);
        }
        let now = Utc::now();
        let mut events = vec![payment.refund(now)?];
        if let Some(reason) = gateway_failure {
            tracing::warn!(%payment_id, reason = %reason, "gateway refund failed, recorded for follow-up");
            events.push(payment.refund_failed(reason, now));
        }
        let payment = self.commit(&mut state, payment, events).await?;
        tracing::info!(%payment_id, "payment refunded");
        Ok(payment)
    }

    async fn commit(
        &self,
        state: &mut State,
        payment: Payment,
        events: Vec<PaymentEvent>,
    ) -> Result<Payment> {
        let records = events
            .iter()
            .map(|event| event.to_outbox())
            .collect::<outbox::Result<Vec<_>>>()?;
        self.outbox
            .transaction(|tx| {
                for record in records {
                    tx.stage(record);
                }
                state.payments.insert(payment.id, payment.clone());
                Ok::<_, DomainError>(payment)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{Money, OrderId};
    use coordination::{LimiterConfig, SemaphoreRegistry};

    use super::*;
    use crate::payment::FakePaymentGateway;

    fn service() -> PaymentService<FakePaymentGateway> {
        let limiter = ConcurrencyLimiter::initialize(&SemaphoreRegistry::new(), &LimiterConfig::default());
        PaymentService::new(
            FakePaymentGateway::instant(),
            limiter,
            InMemoryOutboxStore::new(),
        )
    }

    fn command(saga: &str) -> CreatePayment {
        CreatePayment::new(
            SagaId::new(saga),
            OrderId::new(),
            Money::from_cents(5000),
            "CARD",
        )
    }

    async fn event_types(service: &PaymentService<FakePaymentGateway>, id: PaymentId) -> Vec<String> {
        service
            .outbox
            .records_for(&id.to_string())
            .await
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    #[tokio::test]
    async fn test_create_payment_is_idempotent_per_saga() {
        let service = service();
        let first = service.create_payment(command("SAGA-1")).await.unwrap();
        let second = service.create_payment(command("SAGA-1")).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_approve_and_confirm() {
        let service = service();
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();

        let approved = service.approve_payment(payment.id).await.unwrap();
        assert_eq!(approved.status, PaymentStatus::Approved);
        assert!(approved.pg_transaction_id.is_some());

        service.approve_payment(payment.id).await.unwrap();
        assert_eq!(service.gateway().approval_count(), 1);

        let confirmed = service.confirm_payment(payment.id).await.unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        assert_eq!(
            event_types(&service, payment.id).await,
            vec!["PaymentApproved", "PaymentConfirmed"]
        );
    }

    #[tokio::test]
    async fn test_declined_approval_fails_payment() {
        let service = service();
        service.gateway().set_fail_on_approve(true);
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();

        let err = service.approve_payment(payment.id).await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_FAILED");
        assert_eq!(
            service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Failed
        );
        assert_eq!(event_types(&service, payment.id).await, vec!["PaymentFailed"]);
    }

    #[tokio::test]
    async fn test_refund_calls_gateway() {
        let service = service();
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();
        let approved = service.approve_payment(payment.id).await.unwrap();

        let refunded = service.refund_payment(payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(
            service.gateway().refunded(),
            vec![approved.pg_transaction_id.unwrap()]
        );

        service.refund_payment(payment.id).await.unwrap();
        assert_eq!(service.gateway().refunded().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_completes_when_gateway_refuses() {
        let service = service();
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();
        service.approve_payment(payment.id).await.unwrap();
        service.gateway().set_fail_on_refund(true);

        let refunded = service.refund_payment(payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(
            event_types(&service, payment.id).await,
            vec!["PaymentApproved", "PaymentRefunded", "PaymentRefundFailed"]
        );
    }

    #[tokio::test]
    async fn test_refund_of_pending_payment_fails_it() {
        let service = service();
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();

        let result = service.refund_payment(payment.id).await.unwrap();
        assert_eq!(result.status, PaymentStatus::Failed);
        assert!(service.gateway().refunded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_approval_keeps_payment_pending() {
        let registry = SemaphoreRegistry::new();
        let config = LimiterConfig {
            key: "semaphore:test".to_string(),
            permits: 1,
            wait: Duration::from_millis(100),
        };
        let limiter = ConcurrencyLimiter::initialize(&registry, &config);
        let service = PaymentService::new(
            FakePaymentGateway::instant(),
            limiter.clone(),
            InMemoryOutboxStore::new(),
        );
        let payment = service.create_payment(command("SAGA-1")).await.unwrap();

        let _held = limiter.acquire().await.unwrap();
        let err = service.approve_payment(payment.id).await.unwrap_err();

        assert_eq!(err.code(), "THROTTLED");
        assert_eq!(
            service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }
}

//! Payment gateway trait and a fake implementation.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId};
use thiserror::Error;
use uuid::Uuid;

/// A refusal from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct GatewayDecline {
    pub code: String,
    pub message: String,
}

impl GatewayDecline {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// External payment processor. Calls are rate limited by the caller.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` for an order. Returns the gateway transaction id.
    async fn approve(&self, order_id: OrderId, amount: Money) -> Result<String, GatewayDecline>;

    /// Refunds a previous approval.
    async fn refund(&self, pg_transaction_id: &str, amount: Money) -> Result<(), GatewayDecline>;
}

#[derive(Debug, Default)]
struct FakeGatewayState {
    fail_on_approve: bool,
    fail_on_refund: bool,
    approvals: Vec<String>,
    refunds: Vec<String>,
}

/// In-process gateway with a fixed latency and switchable failures.
#[derive(Debug, Clone)]
pub struct FakePaymentGateway {
    delay: Duration,
    state: Arc<RwLock<FakeGatewayState>>,
}

impl Default for FakePaymentGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl FakePaymentGateway {
    /// Creates a gateway that answers every call after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(RwLock::new(FakeGatewayState::default())),
        }
    }

    /// A gateway with no latency, for tests.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Makes approvals fail until switched back.
    pub fn set_fail_on_approve(&self, fail: bool) {
        self.write().fail_on_approve = fail;
    }

    /// Makes refunds fail until switched back.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.write().fail_on_refund = fail;
    }

    /// Number of approvals granted so far.
    pub fn approval_count(&self) -> usize {
        self.read().approvals.len()
    }

    /// Transaction ids refunded so far.
    pub fn refunded(&self) -> Vec<String> {
        self.read().refunds.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, FakeGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, FakeGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn approve(&self, order_id: OrderId, amount: Money) -> Result<String, GatewayDecline> {
        tokio::time::sleep(self.delay).await;
        let mut state = self.write();
        if state.fail_on_approve {
            tracing::debug!(%order_id, %amount, "fake gateway declined approval");
            return Err(GatewayDecline::new("PG_ERROR_001", "Payment approval declined"));
        }
        let simple = Uuid::new_v4().simple().to_string();
        let pg_transaction_id = format!("PG-{}", simple[..16].to_uppercase());
        state.approvals.push(pg_transaction_id.clone());
        Ok(pg_transaction_id)
    }

    async fn refund(&self, pg_transaction_id: &str, amount: Money) -> Result<(), GatewayDecline> {
        tokio::time::sleep(self.delay).await;
        let mut state = self.write();
        if state.fail_on_refund {
            tracing::debug!(pg_transaction_id, %amount, "fake gateway declined refund");
            return Err(GatewayDecline::new("PG_ERROR_002", "Refund declined"));
        }
        state.refunds.push(pg_transaction_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_approve_and_refund() {
        let gateway = FakePaymentGateway::instant();
        let tx = gateway
            .approve(OrderId::new(), Money::from_cents(5000))
            .await
            .unwrap();
        assert!(tx.starts_with("PG-"));
        assert_eq!(gateway.approval_count(), 1);

        gateway.refund(&tx, Money::from_cents(5000)).await.unwrap();
        assert_eq!(gateway.refunded(), vec![tx]);
    }

    #[tokio::test]
    async fn test_failure_toggles() {
        let gateway = FakePaymentGateway::instant();
        gateway.set_fail_on_approve(true);
        let err = gateway
            .approve(OrderId::new(), Money::from_cents(100))
            .await
            .unwrap_err();
        assert_eq!(err.code, "PG_ERROR_001");

        gateway.set_fail_on_refund(true);
        let err = gateway.refund("PG-X", Money::from_cents(100)).await.unwrap_err();
        assert_eq!(err.code, "PG_ERROR_002");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_applied() {
        let gateway = FakePaymentGateway::new(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        gateway
            .approve(OrderId::new(), Money::from_cents(100))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}

//! Saga ledger: the durable record of what a saga has done so far.
//!
//! A step is appended only after it succeeds, so compensation can be driven
//! from the ledger alone, including after a restart.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, ErrorKind, Money, OrderId, PaymentId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::state::SagaState;

/// Input of an order saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSagaRequest {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Total charged for the order.
    pub amount: Money,
    pub payment_method: String,
}

impl OrderSagaRequest {
    pub fn new(
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: u32,
        amount: Money,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            product_id,
            quantity,
            amount,
            payment_method: payment_method.into(),
        }
    }

    /// Rejects requests no step could accept.
    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(SagaError::InvalidRequest(
                "quantity must be positive".to_string(),
            ));
        }
        if !self.amount.is_positive() {
            return Err(SagaError::InvalidRequest(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.payment_method.trim().is_empty() {
            return Err(SagaError::InvalidRequest(
                "payment method is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Forward steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    CreateOrder,
    ReserveStock,
    CreatePayment,
    ApprovePayment,
    ConfirmOrder,
    ConfirmStock,
    ConfirmPayment,
}

impl SagaStep {
    pub const ALL: [SagaStep; 7] = [
        SagaStep::CreateOrder,
        SagaStep::ReserveStock,
        SagaStep::CreatePayment,
        SagaStep::ApprovePayment,
        SagaStep::ConfirmOrder,
        SagaStep::ConfirmStock,
        SagaStep::ConfirmPayment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::CreateOrder => "CREATE_ORDER",
            SagaStep::ReserveStock => "RESERVE_STOCK",
            SagaStep::CreatePayment => "CREATE_PAYMENT",
            SagaStep::ApprovePayment => "APPROVE_PAYMENT",
            SagaStep::ConfirmOrder => "CONFIRM_ORDER",
            SagaStep::ConfirmStock => "CONFIRM_STOCK",
            SagaStep::ConfirmPayment => "CONFIRM_PAYMENT",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compensating actions, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStep {
    RefundPayment,
    CancelStock,
    CancelOrder,
}

impl CompensationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationStep::RefundPayment => "REFUND_PAYMENT",
            CompensationStep::CancelStock => "CANCEL_STOCK",
            CompensationStep::CancelOrder => "CANCEL_ORDER",
        }
    }
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The error that stopped the forward chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: SagaStep,
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

/// A compensating action that failed and left state un-reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step: CompensationStep,
    pub code: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything known about one saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLedger {
    pub saga_id: SagaId,
    pub request: OrderSagaRequest,
    pub state: SagaState,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    /// Forward steps that succeeded, in order.
    pub completed_steps: Vec<SagaStep>,
    pub failure: Option<StepFailure>,
    pub compensation_failures: Vec<CompensationFailure>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaLedger {
    pub fn start(saga_id: SagaId, request: OrderSagaRequest) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            request,
            state: SagaState::Running,
            order_id: None,
            payment_id: None,
            completed_steps: Vec::new(),
            failure: None,
            compensation_failures: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self, step: SagaStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Appends a successful step. Recording a step twice keeps one entry.
    pub fn record(&mut self, step: SagaStep) {
        if !self.has_completed(step) {
            self.completed_steps.push(step);
        }
        self.updated_at = Utc::now();
    }

    /// True once stock was reserved and not yet turned into a sale.
    ///
    /// A confirmed reservation still needs cancelling when a later step
    /// fails, so confirmation does not clear this.
    pub fn stock_reserved(&self) -> bool {
        self.has_completed(SagaStep::ReserveStock)
    }

    /// Compensations owed for the completed steps, strictly in reverse.
    pub fn pending_compensations(&self) -> Vec<CompensationStep> {
        let mut steps = Vec::new();
        if self.payment_id.is_some() {
            steps.push(CompensationStep::RefundPayment);
        }
        if self.stock_reserved() {
            steps.push(CompensationStep::CancelStock);
        }
        if self.order_id.is_some() {
            steps.push(CompensationStep::CancelOrder);
        }
        steps
    }

    pub fn transition(&mut self, state: SagaState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Persistence for saga ledgers.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts or replaces the ledger for its saga id.
    async fn save(&self, ledger: &SagaLedger) -> Result<()>;

    async fn get(&self, saga_id: &SagaId) -> Result<Option<SagaLedger>>;

    /// Ledgers currently in `state`, oldest first.
    async fn find_by_state(&self, state: SagaState) -> Result<Vec<SagaLedger>>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn save(&self, ledger: &SagaLedger) -> Result<()> {
        (**self).save(ledger).await
    }

    async fn get(&self, saga_id: &SagaId) -> Result<Option<SagaLedger>> {
        (**self).get(saga_id).await
    }

    async fn find_by_state(&self, state: SagaState) -> Result<Vec<SagaLedger>> {
        (**self).find_by_state(state).await
    }
}

/// In-memory ledger store.
///
/// Ledgers are kept as JSON so a stored copy never shares state with the
/// orchestrator's working copy.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    ledgers: Arc<RwLock<HashMap<SagaId, serde_json::Value>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn save(&self, ledger: &SagaLedger) -> Result<()> {
        let value = serde_json::to_value(ledger)?;
        self.ledgers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ledger.saga_id.clone(), value);
        Ok(())
    }

    async fn get(&self, saga_id: &SagaId) -> Result<Option<SagaLedger>> {
        let value = self
            .ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(saga_id)
            .cloned();
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn find_by_state(&self, state: SagaState) -> Result<Vec<SagaLedger>> {
        let values: Vec<serde_json::Value> = self
            .ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut ledgers = Vec::new();
        for value in values {
            let ledger: SagaLedger = serde_json::from_value(value)?;
            if ledger.state == state {
                ledgers.push(ledger);
            }
        }
        ledgers.sort_by_key(|ledger| ledger.started_at);
        Ok(ledgers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OrderSagaRequest {
        OrderSagaRequest::new(
            CustomerId::new(),
            ProductId::new("SKU-1"),
            2,
            Money::from_cents(5000),
            "CARD",
        )
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        assert!(request().validate().is_ok());

        let mut zero = request();
        zero.quantity = 0;
        assert!(matches!(zero.validate(), Err(SagaError::InvalidRequest(_))));

        let mut free = request();
        free.amount = Money::zero();
        assert!(matches!(free.validate(), Err(SagaError::InvalidRequest(_))));

        let mut no_method = request();
        no_method.payment_method = "  ".to_string();
        assert!(no_method.validate().is_err());
    }

    #[test]
    fn test_no_compensation_before_any_step() {
        let ledger = SagaLedger::start(SagaId::generate(), request());
        assert!(ledger.pending_compensations().is_empty());
    }

    #[test]
    fn test_compensations_run_in_reverse() {
        let mut ledger = SagaLedger::start(SagaId::generate(), request());
        ledger.order_id = Some(OrderId::new());
        ledger.record(SagaStep::CreateOrder);
        ledger.record(SagaStep::ReserveStock);
        ledger.payment_id = Some(PaymentId::new());
        ledger.record(SagaStep::CreatePayment);

        assert_eq!(
            ledger.pending_compensations(),
            vec![
                CompensationStep::RefundPayment,
                CompensationStep::CancelStock,
                CompensationStep::CancelOrder,
            ]
        );
    }

    #[test]
    fn test_failed_reservation_is_not_compensated() {
        let mut ledger = SagaLedger::start(SagaId::generate(), request());
        ledger.order_id = Some(OrderId::new());
        ledger.record(SagaStep::CreateOrder);

        assert_eq!(
            ledger.pending_compensations(),
            vec![CompensationStep::CancelOrder]
        );
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut ledger = SagaLedger::start(SagaId::generate(), request());
        ledger.record(SagaStep::CreateOrder);
        ledger.record(SagaStep::CreateOrder);
        assert_eq!(ledger.completed_steps, vec![SagaStep::CreateOrder]);
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_find_by_state() {
        let store = InMemoryLedgerStore::new();
        let mut running = SagaLedger::start(SagaId::new("SAGA-A"), request());
        let mut done = SagaLedger::start(SagaId::new("SAGA-B"), request());
        done.transition(SagaState::Completed);

        store.save(&running).await.unwrap();
        store.save(&done).await.unwrap();
        assert_eq!(store.len(), 2);

        let loaded = store.get(&running.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded, running);

        running.transition(SagaState::Compensating);
        store.save(&running).await.unwrap();
        assert_eq!(store.len(), 2);

        let compensating = store
            .find_by_state(SagaState::Compensating)
            .await
            .unwrap();
        assert_eq!(compensating.len(), 1);
        assert_eq!(compensating[0].saga_id, running.saga_id);
        assert!(store.find_by_state(SagaState::Running).await.unwrap().is_empty());
        assert!(store.get(&SagaId::new("SAGA-X")).await.unwrap().is_none());
    }
}

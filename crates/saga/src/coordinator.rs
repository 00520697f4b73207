//! Saga orchestrator for the order saga.

use common::{ErrorKind, OrderId, PaymentId, SagaId};
use domain::{CreateOrder, CreatePayment, DomainError};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::ledger::{
    CompensationFailure, CompensationStep, LedgerStore, OrderSagaRequest, SagaLedger, SagaStep,
    StepFailure,
};
use crate::services::{InventoryParticipant, OrderParticipant, PaymentParticipant};
use crate::state::SagaState;

/// How compensating actions are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationPolicy {
    /// One at a time, newest step first.
    #[default]
    SequentialReverse,
    /// All at once. Each action still runs to completion independently.
    Parallel,
}

/// The result reported to the caller of [`SagaOrchestrator::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaOutcome {
    pub saga_id: SagaId,
    pub success: bool,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    /// Message of the error that stopped the forward chain.
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// `CompensationFailure` when the rollback itself failed, otherwise the
    /// kind of the originating error.
    pub error_kind: Option<ErrorKind>,
    pub compensation_failed: bool,
}

impl SagaOutcome {
    pub fn from_ledger(ledger: &SagaLedger) -> Self {
        let compensation_failed = ledger.state == SagaState::CompensationFailed;
        let error_kind = match &ledger.failure {
            Some(_) if compensation_failed => Some(ErrorKind::CompensationFailure),
            Some(failure) => Some(failure.kind),
            None => None,
        };
        Self {
            saga_id: ledger.saga_id.clone(),
            success: ledger.state == SagaState::Completed,
            order_id: ledger.order_id,
            payment_id: ledger.payment_id,
            error_message: ledger.failure.as_ref().map(|f| f.message.clone()),
            error_code: ledger.failure.as_ref().map(|f| f.code.clone()),
            error_kind,
            compensation_failed,
        }
    }
}

impl StepFailure {
    fn from_error(step: SagaStep, error: &DomainError) -> Self {
        Self {
            step,
            kind: error.kind(),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    fn interrupted(step: SagaStep) -> Self {
        Self {
            step,
            kind: ErrorKind::Infrastructure,
            code: "SAGA_INTERRUPTED".to_string(),
            message: format!("saga interrupted during {step}"),
        }
    }

    fn missing(step: SagaStep, what: &str) -> Self {
        Self {
            step,
            kind: ErrorKind::Infrastructure,
            code: "LEDGER_INCONSISTENT".to_string(),
            message: format!("{step} needs {what}, which the ledger does not hold"),
        }
    }
}

/// Orchestrates the order saga.
///
/// Forward steps run strictly in order: create order, reserve stock, create
/// payment, approve payment, confirm order, confirm stock, confirm payment.
/// When one fails, the completed steps are compensated in reverse and the
/// saga reports failure. No partial success is ever reported.
pub struct SagaOrchestrator<O, I, P, L> {
    orders: O,
    inventory: I,
    payments: P,
    ledgers: L,
    policy: CompensationPolicy,
}

impl<O, I, P, L> SagaOrchestrator<O, I, P, L>
where
    O: OrderParticipant,
    I: InventoryParticipant,
    P: PaymentParticipant,
    L: LedgerStore,
{
    pub fn new(orders: O, inventory: I, payments: P, ledgers: L) -> Self {
        Self {
            orders,
            inventory,
            payments,
            ledgers,
            policy: CompensationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CompensationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CompensationPolicy {
        self.policy
    }

    pub fn ledgers(&self) -> &L {
        &self.ledgers
    }

    /// Runs one saga to a terminal state.
    ///
    /// Returns `Err` only when the request is invalid or the ledger cannot
    /// be opened; a failing step yields `Ok` with `success == false`.
    #[tracing::instrument(skip(self, request), fields(saga_id = tracing::field::Empty))]
    pub async fn execute(&self, request: OrderSagaRequest) -> Result<SagaOutcome> {
        request.validate()?;

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();
        let saga_id = SagaId::generate();
        tracing::Span::current().record("saga_id", saga_id.as_str());

        let mut ledger = SagaLedger::start(saga_id, request);
        self.ledgers.save(&ledger).await?;

        for step in SagaStep::ALL {
            tracing::info!(step = %step, "saga step started");
            if let Err(failure) = self.run_step(&mut ledger, step).await {
                tracing::warn!(
                    step = %step,
                    code = %failure.code,
                    error = %failure.message,
                    "saga step failed"
                );
                ledger.failure = Some(failure);
                self.compensate(&mut ledger).await;
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                return Ok(SagaOutcome::from_ledger(&ledger));
            }
            ledger.record(step);
            self.persist(&ledger).await;
        }

        ledger.transition(SagaState::Completed);
        self.persist(&ledger).await;
        self.release_stock_hold(&ledger).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(saga_id = %ledger.saga_id, duration, "saga completed successfully");

        Ok(SagaOutcome::from_ledger(&ledger))
    }

    /// Loads a saga's ledger.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Result<SagaLedger> {
        self.ledgers
            .get(saga_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))
    }

    /// Sagas whose rollback left side effects behind.
    pub async fn compensation_failures(&self) -> Result<Vec<SagaLedger>> {
        self.ledgers
            .find_by_state(SagaState::CompensationFailed)
            .await
    }

    /// Finishes sagas a previous process left mid-flight.
    ///
    /// A running saga that had completed every step is marked completed;
    /// any other unfinished saga is compensated from its ledger.
    #[tracing::instrument(skip(self))]
    pub async fn recover_unfinished(&self) -> Result<Vec<SagaOutcome>> {
        let mut unfinished = self.ledgers.find_by_state(SagaState::Running).await?;
        unfinished.extend(self.ledgers.find_by_state(SagaState::Compensating).await?);

        let mut outcomes = Vec::with_capacity(unfinished.len());
        for mut ledger in unfinished {
            let all_done = ledger.completed_steps.len() == SagaStep::ALL.len();
            if ledger.state == SagaState::Running && all_done {
                ledger.transition(SagaState::Completed);
                self.persist(&ledger).await;
                self.release_stock_hold(&ledger).await;
                tracing::info!(saga_id = %ledger.saga_id, "recovered saga marked completed");
                outcomes.push(SagaOutcome::from_ledger(&ledger));
                continue;
            }

            if ledger.failure.is_none() {
                let next = SagaStep::ALL
                    .get(ledger.completed_steps.len())
                    .copied()
                    .unwrap_or(SagaStep::ConfirmPayment);
                ledger.failure = Some(StepFailure::interrupted(next));
            }
            tracing::warn!(
                saga_id = %ledger.saga_id,
                state = %ledger.state,
                completed = ledger.completed_steps.len(),
                "compensating interrupted saga"
            );
            self.compensate(&mut ledger).await;
            outcomes.push(SagaOutcome::from_ledger(&ledger));
        }
        Ok(outcomes)
    }

    async fn run_step(
        &self,
        ledger: &mut SagaLedger,
        step: SagaStep,
    ) -> std::result::Result<(), StepFailure> {
        let saga_id = ledger.saga_id.clone();
        let request = ledger.request.clone();
        let fail = |error: DomainError| StepFailure::from_error(step, &error);

        match step {
            SagaStep::CreateOrder => {
                let cmd = CreateOrder::new(
                    saga_id,
                    request.customer_id,
                    request.product_id,
                    request.quantity,
                    request.amount,
                );
                let order_id = self.orders.create(cmd).await.map_err(fail)?;
                ledger.order_id = Some(order_id);
            }
            SagaStep::ReserveStock => {
                self.inventory
                    .reserve(&request.product_id, request.quantity, &saga_id)
                    .await
                    .map_err(fail)?;
            }
            SagaStep::CreatePayment => {
                let order_id = ledger
                    .order_id
                    .ok_or_else(|| StepFailure::missing(step, "an order id"))?;
                let cmd = CreatePayment::new(
                    saga_id,
                    order_id,
                    request.amount,
                    request.payment_method,
                );
                let payment_id = self.payments.create(cmd).await.map_err(fail)?;
                ledger.payment_id = Some(payment_id);
            }
            SagaStep::ApprovePayment | SagaStep::ConfirmPayment => {
                let payment_id = ledger
                    .payment_id
                    .ok_or_else(|| StepFailure::missing(step, "a payment id"))?;
                let result = if step == SagaStep::ApprovePayment {
                    self.payments.approve(payment_id).await
                } else {
                    self.payments.confirm(payment_id).await
                };
                result.map_err(fail)?;
            }
            SagaStep::ConfirmOrder => {
                let order_id = ledger
                    .order_id
                    .ok_or_else(|| StepFailure::missing(step, "an order id"))?;
                self.orders.confirm(order_id).await.map_err(fail)?;
            }
            SagaStep::ConfirmStock => {
                self.inventory
                    .confirm(&request.product_id, request.quantity, &saga_id)
                    .await
                    .map_err(fail)?;
            }
        }
        Ok(())
    }

    /// Runs every compensation the ledger owes and settles the final state.
    ///
    /// A failing action is logged and recorded; the remaining ones still run.
    #[tracing::instrument(skip(self, ledger), fields(saga_id = %ledger.saga_id))]
    async fn compensate(&self, ledger: &mut SagaLedger) {
        ledger.transition(SagaState::Compensating);
        self.persist(ledger).await;

        let steps = ledger.pending_compensations();
        let snapshot: &SagaLedger = ledger;
        let results = match self.policy {
            CompensationPolicy::SequentialReverse => {
                let mut results = Vec::with_capacity(steps.len());
                for &step in &steps {
                    results.push(self.run_compensation(snapshot, step).await);
                }
                results
            }
            CompensationPolicy::Parallel => {
                join_all(
                    steps
                        .iter()
                        .map(|&step| self.run_compensation(snapshot, step)),
                )
                .await
            }
        };

        for (step, result) in steps.into_iter().zip(results) {
            match result {
                Ok(()) => tracing::info!(step = %step, "compensation step completed"),
                Err(e) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(
                        step = %step,
                        code = e.code(),
                        error = %e,
                        "compensation step failed, manual reconciliation required"
                    );
                    ledger.compensation_failures.push(CompensationFailure {
                        step,
                        code: e.code().to_string(),
                        message: e.to_string(),
                        failed_at: chrono::Utc::now(),
                    });
                }
            }
        }

        let final_state = if ledger.compensation_failures.is_empty() {
            SagaState::Failed
        } else {
            SagaState::CompensationFailed
        };
        ledger.transition(final_state);
        self.persist(ledger).await;
        if final_state == SagaState::Failed {
            self.release_stock_hold(ledger).await;
        }

        metrics::counter!("saga_failed").increment(1);
        let reason = ledger
            .failure
            .as_ref()
            .map(|f| f.message.as_str())
            .unwrap_or("unknown");
        tracing::warn!(state = %final_state, reason, "saga failed");
    }

    async fn run_compensation(
        &self,
        ledger: &SagaLedger,
        step: CompensationStep,
    ) -> domain::Result<()> {
        let request = &ledger.request;
        match step {
            CompensationStep::RefundPayment => match ledger.payment_id {
                Some(payment_id) => self.payments.refund(payment_id).await,
                None => Ok(()),
            },
            CompensationStep::CancelStock => {
                self.inventory
                    .cancel(&request.product_id, request.quantity, &ledger.saga_id)
                    .await
            }
            CompensationStep::CancelOrder => match ledger.order_id {
                Some(order_id) => self.orders.cancel(order_id).await,
                None => Ok(()),
            },
        }
    }

    /// Lets inventory drop the saga's hold. A saga left in
    /// `CompensationFailed` keeps it so the cancel can still be retried.
    async fn release_stock_hold(&self, ledger: &SagaLedger) {
        if !ledger.has_completed(SagaStep::ReserveStock) {
            return;
        }
        if let Err(e) = self
            .inventory
            .release(&ledger.request.product_id, &ledger.saga_id)
            .await
        {
            tracing::warn!(
                saga_id = %ledger.saga_id,
                code = e.code(),
                error = %e,
                "failed to release stock hold"
            );
        }
    }

    async fn persist(&self, ledger: &SagaLedger) {
        if let Err(e) = self.ledgers.save(ledger).await {
            tracing::error!(saga_id = %ledger.saga_id, error = %e, "failed to persist saga ledger");
        }
    }
}

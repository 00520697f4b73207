//! Saga entry point and saga inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{CustomerId, Money, ProductId, SagaId};
use domain::{Order, Payment};
use saga::{OrderSagaRequest, SagaLedger, SagaOutcome};
use serde::Deserialize;

use super::idempotency_key;
use crate::error::{ApiError, status_for};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartOrderSaga {
    /// Generated when absent.
    pub customer_id: Option<String>,
    pub product_id: String,
    pub quantity: u32,
    pub amount_cents: i64,
    pub payment_method: String,
}

/// POST /sagas/orders: runs the order saga to completion.
///
/// The body is the saga outcome either way. A failed saga answers with the
/// status of its error kind. With an idempotency key, a repeated request
/// replays the first outcome instead of starting another saga.
#[tracing::instrument(skip(state, headers, body), fields(product_id = %body.product_id))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartOrderSaga>,
) -> Result<(StatusCode, Json<SagaOutcome>), ApiError> {
    let customer_id = match body.customer_id.as_deref() {
        Some(raw) => uuid::Uuid::parse_str(raw)
            .map(CustomerId::from_uuid)
            .map_err(|e| ApiError::BadRequest(format!("Invalid customer_id: {e}")))?,
        None => CustomerId::new(),
    };
    let request = OrderSagaRequest::new(
        customer_id,
        ProductId::new(body.product_id),
        body.quantity,
        Money::from_cents(body.amount_cents),
        body.payment_method,
    );

    let key = idempotency_key(&headers, state.saga_requests.header_name());
    let app = Arc::clone(&state);
    let outcome: SagaOutcome = state
        .saga_requests
        .execute(key.as_deref(), move || async move {
            app.orchestrator
                .execute(request)
                .await
                .map_err(ApiError::from)
        })
        .await?;

    let status = match outcome.error_kind {
        None => StatusCode::OK,
        Some(kind) => status_for(kind),
    };
    Ok((status, Json(outcome)))
}

/// GET /sagas/{id}: the saga's ledger.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaLedger>, ApiError> {
    let ledger = state.orchestrator.get_saga(&SagaId::new(id)).await?;
    Ok(Json(ledger))
}

/// GET /sagas/compensation-failures: sagas whose rollback needs an operator.
#[tracing::instrument(skip(state))]
pub async fn compensation_failures(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SagaLedger>>, ApiError> {
    Ok(Json(state.orchestrator.compensation_failures().await?))
}

/// GET /sagas/{id}/order: the order the saga created.
#[tracing::instrument(skip(state))]
pub async fn order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let saga_id = SagaId::new(id);
    state
        .orders
        .find_by_saga(&saga_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No order for saga {saga_id}")))
}

/// POST /sagas/{id}/order/complete: marks a sold order as fulfilled.
///
/// Only a confirmed order can be completed; completing twice is a no-op.
#[tracing::instrument(skip(state))]
pub async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let saga_id = SagaId::new(id);
    let order = state
        .orders
        .find_by_saga(&saga_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No order for saga {saga_id}")))?;
    Ok(Json(state.orders.complete_order(order.id).await?))
}

/// GET /sagas/{id}/payment: the payment the saga opened.
#[tracing::instrument(skip(state))]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let saga_id = SagaId::new(id);
    state
        .payments
        .find_by_saga(&saga_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No payment for saga {saga_id}")))
}

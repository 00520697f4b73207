//! Inventory endpoints. The step endpoints require an idempotency key.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{ProductId, SagaId};
use domain::InventoryRecord;
use domain::inventory::StockOperation;
use serde::{Deserialize, Serialize};

use super::idempotency_key;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterProduct {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct AddStock {
    pub quantity: u32,
}

/// Body of the reserve, confirm and cancel endpoints.
#[derive(Debug, Deserialize)]
pub struct StockStep {
    pub saga_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryView {
    pub product_id: ProductId,
    pub total_quantity: u32,
    pub reserved_quantity: u32,
    pub available_quantity: u32,
    pub status: String,
    pub owner_saga_id: Option<SagaId>,
    pub version: u64,
}

impl From<InventoryRecord> for InventoryView {
    fn from(record: InventoryRecord) -> Self {
        Self {
            available_quantity: record.available_quantity(),
            status: record.status.as_str().to_string(),
            product_id: record.product_id,
            total_quantity: record.total_quantity,
            reserved_quantity: record.reserved_quantity,
            owner_saga_id: record.owner_saga_id,
            version: record.version,
        }
    }
}

/// POST /inventory/products
#[tracing::instrument(skip(state))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterProduct>,
) -> Result<(StatusCode, Json<InventoryView>), ApiError> {
    if req.product_id.trim().is_empty() {
        return Err(ApiError::BadRequest("product_id is required".to_string()));
    }
    let record = state
        .inventory
        .register_product(ProductId::new(req.product_id), req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /inventory/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InventoryView>, ApiError> {
    let record = state.inventory.get(&ProductId::new(id)).await?;
    Ok(Json(record.into()))
}

/// POST /inventory/{id}/stock
#[tracing::instrument(skip(state))]
pub async fn add_stock(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddStock>,
) -> Result<Json<InventoryView>, ApiError> {
    let record = state
        .inventory
        .add_stock(&ProductId::new(id), req.quantity)
        .await?;
    Ok(Json(record.into()))
}

/// POST /inventory/{id}/reserve
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StockStep>,
) -> Result<Json<InventoryView>, ApiError> {
    run_step(&state, &headers, id, req, StockOperation::Reserve)
        .await
        .map(Json)
}

/// POST /inventory/{id}/confirm
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StockStep>,
) -> Result<Json<InventoryView>, ApiError> {
    run_step(&state, &headers, id, req, StockOperation::Confirm)
        .await
        .map(Json)
}

/// POST /inventory/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StockStep>,
) -> Result<Json<InventoryView>, ApiError> {
    run_step(&state, &headers, id, req, StockOperation::Cancel)
        .await
        .map(Json)
}

/// DELETE /inventory/{id}/holds/{saga_id}
///
/// Called once a saga has ended. Repeating it is harmless, so no
/// idempotency key is needed.
#[tracing::instrument(skip(state))]
pub async fn release_hold(
    State(state): State<Arc<AppState>>,
    Path((id, saga_id)): Path<(String, String)>,
) -> Result<Json<InventoryView>, ApiError> {
    let record = state
        .inventory
        .release_hold(&ProductId::new(id), &SagaId::new(saga_id))
        .await?;
    Ok(Json(record.into()))
}

#[tracing::instrument(skip(state, headers, req), fields(saga_id = %req.saga_id))]
async fn run_step(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    product_id: String,
    req: StockStep,
    operation: StockOperation,
) -> Result<InventoryView, ApiError> {
    if req.saga_id.trim().is_empty() {
        return Err(ApiError::BadRequest("saga_id is required".to_string()));
    }
    let key = idempotency_key(headers, state.inventory_requests.header_name());
    let inventory = state.inventory.clone();
    let product_id = ProductId::new(product_id);
    let saga_id = SagaId::new(req.saga_id);

    state
        .inventory_requests
        .execute(key.as_deref(), move || async move {
            let result = match operation {
                StockOperation::Reserve => {
                    inventory.reserve(&product_id, req.quantity, &saga_id).await
                }
                StockOperation::Confirm => {
                    inventory.confirm(&product_id, req.quantity, &saga_id).await
                }
                StockOperation::Cancel => {
                    inventory.cancel(&product_id, req.quantity, &saga_id).await
                }
            };
            result.map(InventoryView::from).map_err(ApiError::from)
        })
        .await
}

//! Operator endpoints for the outbox.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use outbox::{DeadLetterRecord, OutboxStats, OutboxStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDeadLetter {
    pub note: String,
}

/// GET /outbox/stats: record counts by status.
#[tracing::instrument(skip(state))]
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<OutboxStats>, ApiError> {
    Ok(Json(state.outbox.stats().await?))
}

/// GET /outbox/dead-letters
#[tracing::instrument(skip(state))]
pub async fn dead_letters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterRecord>>, ApiError> {
    let letters = state.outbox.dead_letters(query.include_resolved).await?;
    Ok(Json(letters))
}

/// POST /outbox/dead-letters/{id}/resolve
#[tracing::instrument(skip(state, req))]
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ResolveDeadLetter>,
) -> Result<Json<DeadLetterRecord>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid dead letter id: {e}")))?;
    if req.note.trim().is_empty() {
        return Err(ApiError::BadRequest("a resolution note is required".to_string()));
    }
    let letter = state
        .outbox
        .resolve_dead_letter(id, &req.note, Utc::now())
        .await?;
    tracing::info!(dead_letter_id = %id, "dead letter resolved");
    Ok(Json(letter))
}

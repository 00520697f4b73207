//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorKind;
use domain::DomainError;
use idempotency::IdempotencyError;
use outbox::OutboxError;
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
///
/// Every variant resolves to an [`ErrorKind`], and the kind alone picks the
/// status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Domain(e) => e.kind(),
            ApiError::Saga(e) => e.kind(),
            ApiError::Idempotency(e) => e.kind(),
            ApiError::Outbox(e) => e.kind(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Domain(e) => e.code(),
            ApiError::Saga(SagaError::InvalidRequest(_)) => "INVALID_REQUEST",
            ApiError::Saga(SagaError::NotFound(_)) => "SAGA_NOT_FOUND",
            ApiError::Saga(_) => "SAGA_LEDGER_ERROR",
            ApiError::Idempotency(e) => e.code(),
            ApiError::Outbox(OutboxError::DeadLetterNotFound(_)) => "DEAD_LETTER_NOT_FOUND",
            ApiError::Outbox(_) => "OUTBOX_ERROR",
        }
    }
}

/// The one place an error kind becomes an HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ResourceConflict => StatusCode::CONFLICT,
        ErrorKind::InsufficientResource => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::CompensationFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
            "kind": kind.as_str(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{ProductId, SagaId};
    use coordination::CoordinationError;

    use super::*;

    #[test]
    fn test_kind_to_status() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::ResourceConflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::InsufficientResource),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::Infrastructure),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorKind::CompensationFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_semantic_lock_conflict_is_409() {
        let err = ApiError::from(DomainError::LockedByOtherSaga {
            product_id: ProductId::new("SKU-1"),
            owner: SagaId::new("SAGA-A"),
            requested_by: SagaId::new("SAGA-B"),
        });
        assert_eq!(err.code(), "LOCKED_BY_OTHER_SAGA");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_throttled_is_503() {
        let err = ApiError::from(DomainError::Coordination(CoordinationError::Throttled {
            key: "semaphore:pg-gateway".to_string(),
            waited: Duration::from_secs(5),
        }));
        assert_eq!(err.code(), "THROTTLED");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_missing_key_is_400() {
        let err = ApiError::from(IdempotencyError::KeyRequired {
            header: "X-Idempotency-Key".to_string(),
        });
        assert_eq!(err.code(), "KEY_REQUIRED");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}

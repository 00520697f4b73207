use common::ErrorKind;
use thiserror::Error;

/// Errors raised by the idempotency guard.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The operation requires a key and the caller supplied none.
    #[error("Missing required idempotency key (header {header})")]
    KeyRequired { header: String },

    /// Another request with the same key is still running.
    #[error("Request with idempotency key {key} is still in flight")]
    RequestInFlight { key: String },

    /// The response cache could not be reached.
    #[error("Idempotency store error: {0}")]
    Store(String),

    /// A cached response could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IdempotencyError {
    /// Classifies the error for the response boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdempotencyError::KeyRequired { .. } => ErrorKind::Validation,
            IdempotencyError::RequestInFlight { .. } => ErrorKind::ResourceConflict,
            IdempotencyError::Store(_) | IdempotencyError::Serialization(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IdempotencyError::KeyRequired { .. } => "KEY_REQUIRED",
            IdempotencyError::RequestInFlight { .. } => "REQUEST_IN_FLIGHT",
            IdempotencyError::Store(_) => "IDEMPOTENCY_STORE_ERROR",
            IdempotencyError::Serialization(_) => "IDEMPOTENCY_SERIALIZATION_ERROR",
        }
    }
}

/// Result type for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;

//! Saga error types.

use common::{ErrorKind, SagaId};
use thiserror::Error;

/// Errors returned by the orchestrator itself.
///
/// A failing step is not one of these: it ends the saga with a failed
/// [`SagaOutcome`](crate::SagaOutcome) after compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request was rejected before any step ran.
    #[error("Invalid saga request: {0}")]
    InvalidRequest(String),

    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The ledger store could not be read or written.
    #[error("Ledger store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::InvalidRequest(_) => ErrorKind::Validation,
            SagaError::NotFound(_) => ErrorKind::NotFound,
            SagaError::Database(_) | SagaError::Migration(_) | SagaError::Serialization(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

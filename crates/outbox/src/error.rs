use common::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{OutboxId, OutboxStatus};

/// Errors that can occur in the outbox pipeline.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No outbox record with this id exists.
    #[error("Outbox record not found: {0}")]
    RecordNotFound(OutboxId),

    /// No dead letter with this id exists.
    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),

    /// The record is not in a state that allows the requested transition.
    #[error("Outbox record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: OutboxId,
        from: OutboxStatus,
        to: OutboxStatus,
    },

    /// The broker rejected or failed to accept a record.
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    /// A status column held a value outside the known set.
    #[error("Unknown outbox status: {0}")]
    UnknownStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// Classifies the error for the response boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::RecordNotFound(_) | OutboxError::DeadLetterNotFound(_) => {
                ErrorKind::NotFound
            }
            OutboxError::InvalidTransition { .. } => ErrorKind::ResourceConflict,
            OutboxError::Serialization(_) => ErrorKind::Validation,
            OutboxError::Publish { .. }
            | OutboxError::UnknownStatus(_)
            | OutboxError::Database(_)
            | OutboxError::Migration(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

//! Coordination error types.

use std::time::Duration;

use common::ErrorKind;
use thiserror::Error;

/// Errors raised while waiting on a lock or a permit.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The lease could not be acquired within the wait timeout.
    #[error("Lock acquisition failed for '{key}' after {waited:?}")]
    LockAcquisitionFailed { key: String, waited: Duration },

    /// The wait was interrupted because the coordinator shut down.
    #[error("Lock wait interrupted for '{key}'")]
    LockInterrupted { key: String },

    /// No permit became free within the wait timeout.
    #[error("Throttled: no permit available on '{key}' within {waited:?}")]
    Throttled { key: String, waited: Duration },
}

impl CoordinationError {
    /// Every coordination failure is an infrastructure problem.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CoordinationError::LockAcquisitionFailed { .. } => "LOCK_ACQUISITION_FAILED",
            CoordinationError::LockInterrupted { .. } => "LOCK_INTERRUPTED",
            CoordinationError::Throttled { .. } => "THROTTLED",
        }
    }
}

/// Convenience type alias for coordination results.
pub type Result<T> = std::result::Result<T, CoordinationError>;

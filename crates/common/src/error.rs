//! Error taxonomy shared by every crate.

use serde::{Deserialize, Serialize};

/// Classification of a failure, resolved once at the response boundary.
///
/// Each crate's error enum maps its variants onto one of these kinds via a
/// `kind()` method; transports translate kinds into status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// Semantic-lock ownership violation or optimistic-version conflict.
    ResourceConflict,
    /// Not enough stock or capacity.
    InsufficientResource,
    /// Lock timeout or interrupt, unavailable broker or gateway, throttling.
    Infrastructure,
    /// A compensating action failed and left a side effect un-rolled-back.
    CompensationFailure,
}

impl ErrorKind {
    /// Returns true if a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ResourceConflict | ErrorKind::Infrastructure)
    }

    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ResourceConflict => "RESOURCE_CONFLICT",
            ErrorKind::InsufficientResource => "INSUFFICIENT_RESOURCE",
            ErrorKind::Infrastructure => "INFRASTRUCTURE_ERROR",
            ErrorKind::CompensationFailure => "COMPENSATION_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

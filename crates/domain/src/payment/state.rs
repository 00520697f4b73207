//! Payment status machine.

use serde::{Deserialize, Serialize};

/// The status of a payment.
///
/// ```text
/// Pending ──► Approved ──► Confirmed
///    │            │            │
///    ▼            └────────────┴──► Refunded
///  Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    /// The gateway accepted the charge.
    Approved,
    Confirmed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn can_approve(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    pub fn can_confirm(&self) -> bool {
        matches!(self, PaymentStatus::Approved)
    }

    /// Returns true if money moved and has to be given back.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_only_after_approval() {
        assert!(!PaymentStatus::Pending.can_refund());
        assert!(PaymentStatus::Approved.can_refund());
        assert!(PaymentStatus::Confirmed.can_refund());
        assert!(!PaymentStatus::Failed.can_refund());
        assert!(!PaymentStatus::Refunded.can_refund());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Approved.is_terminal());
    }
}

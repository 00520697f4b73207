//! Participant traits the orchestrator drives, with implementations for the
//! domain services.
//!
//! Every call carries the saga id so participants can attribute ownership
//! and treat a repeated call as a no-op.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::InventoryParticipant;
pub use order::OrderParticipant;
pub use payment::PaymentParticipant;

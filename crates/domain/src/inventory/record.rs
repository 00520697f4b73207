//! Inventory record and its semantic-lock state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Semantic-lock status of an inventory record.
///
/// ```text
/// Available ──acquire(S)──► Reserving ──reserve──► Reserved ──confirm(S)──► Available
///                               │                      │
///                               └──────cancel(S)───────┴──────────────────► Available
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// No saga owns the record.
    #[default]
    Available,

    /// A saga holds the lock and is placing its reservation.
    Reserving,

    /// A saga's reservation is in place, awaiting confirm or cancel.
    Reserved,
}

impl ReservationStatus {
    /// Returns true if a saga currently owns the record.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Reserving | ReservationStatus::Reserved
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Available => "AVAILABLE",
            ReservationStatus::Reserving => "RESERVING",
            ReservationStatus::Reserved => "RESERVED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step operations a saga performs on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockOperation {
    Reserve,
    Confirm,
    Cancel,
}

/// Result of applying a step operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The record changed.
    Applied,
    /// The same saga already performed this operation; nothing changed.
    AlreadySettled,
}

/// Result of a cancel, noting whether the clamp at zero kicked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub settlement: Settlement,
    /// Quantity that could not be returned because less was reserved.
    pub underflow: u32,
}

/// Where a saga's stock stands on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStage {
    Reserved,
    Confirmed,
    Cancelled,
}

/// One saga's stake in a record, kept until the saga releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaHold {
    pub quantity: u32,
    pub stage: HoldStage,
}

/// Stock level of one product plus the semantic lock guarding it.
///
/// Invariants: `reserved_quantity <= total_quantity`, and `owner_saga_id` is
/// set exactly when `status` is not `Available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub total_quantity: u32,
    pub reserved_quantity: u32,
    pub status: ReservationStatus,
    pub owner_saga_id: Option<SagaId>,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    /// Bumped on every committed change.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    /// Per-saga holds. An entry lives until [`release_hold`](Self::release_hold).
    #[serde(default)]
    holds: BTreeMap<SagaId, SagaHold>,
}

impl InventoryRecord {
    /// Creates an unlocked record holding `total_quantity` units.
    pub fn new(product_id: ProductId, total_quantity: u32, at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            total_quantity,
            reserved_quantity: 0,
            status: ReservationStatus::Available,
            owner_saga_id: None,
            lock_acquired_at: None,
            version: 0,
            updated_at: at,
            holds: BTreeMap::new(),
        }
    }

    /// Units neither reserved nor sold.
    pub fn available_quantity(&self) -> u32 {
        self.total_quantity.saturating_sub(self.reserved_quantity)
    }

    /// The hold `saga_id` has on this record, if any.
    pub fn hold(&self, saga_id: &SagaId) -> Option<SagaHold> {
        self.holds.get(saga_id).copied()
    }

    /// Number of sagas still holding an entry.
    pub fn hold_count(&self) -> usize {
        self.holds.len()
    }

    /// Takes the semantic lock for `saga_id`. Re-entrant for the owner.
    pub fn acquire_semantic_lock(&mut self, saga_id: &SagaId, at: DateTime<Utc>) -> Result<()> {
        match &self.owner_saga_id {
            Some(owner) if self.status.is_locked() && owner != saga_id => {
                return Err(DomainError::LockedByOtherSaga {
                    product_id: self.product_id.clone(),
                    owner: owner.clone(),
                    requested_by: saga_id.clone(),
                });
            }
            _ => {}
        }
        if self.owner_saga_id.as_ref() != Some(saga_id) {
            self.lock_acquired_at = Some(at);
        }
        self.status = ReservationStatus::Reserving;
        self.owner_saga_id = Some(saga_id.clone());
        Ok(())
    }

    /// Fails if another saga owns the record.
    pub fn validate_ownership(&self, saga_id: &SagaId) -> Result<()> {
        match &self.owner_saga_id {
            Some(owner) if owner != saga_id => Err(DomainError::InvalidOwnership {
                product_id: self.product_id.clone(),
                owner: owner.clone(),
                requested_by: saga_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Sets aside `quantity` units.
    pub fn reserve(&mut self, quantity: u32) -> Result<()> {
        let available = self.available_quantity();
        if available < quantity {
            return Err(DomainError::InsufficientStock {
                product_id: self.product_id.clone(),
                requested: quantity,
                available,
            });
        }
        self.reserved_quantity += quantity;
        Ok(())
    }

    /// Marks the owner's reservation as placed.
    pub fn mark_reserved(&mut self) {
        self.status = ReservationStatus::Reserved;
    }

    /// Turns `quantity` reserved units into sold ones and unlocks.
    pub fn confirm_reservation(&mut self, quantity: u32) -> Result<()> {
        if self.reserved_quantity < quantity {
            return Err(DomainError::ReservationUnderflow {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved_quantity,
            });
        }
        self.reserved_quantity -= quantity;
        self.total_quantity -= quantity;
        self.clear_semantic_lock();
        Ok(())
    }

    /// Returns `quantity` reserved units to stock and unlocks.
    ///
    /// Never drops `reserved_quantity` below zero. The returned value is the
    /// part of `quantity` that was not actually reserved.
    pub fn cancel_reservation(&mut self, quantity: u32) -> u32 {
        let underflow = quantity.saturating_sub(self.reserved_quantity);
        self.reserved_quantity = self.reserved_quantity.saturating_sub(quantity);
        self.clear_semantic_lock();
        underflow
    }

    pub fn clear_semantic_lock(&mut self) {
        self.status = ReservationStatus::Available;
        self.owner_saga_id = None;
        self.lock_acquired_at = None;
    }

    /// Adds units to the total.
    pub fn add_stock(&mut self, quantity: u32) {
        self.total_quantity = self.total_quantity.saturating_add(quantity);
    }

    /// Reserve step for a saga: lock, reserve, mark reserved.
    ///
    /// A saga that already holds an entry here changes nothing.
    pub fn apply_reserve(
        &mut self,
        saga_id: &SagaId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        if self.holds.contains_key(saga_id) {
            return Ok(Settlement::AlreadySettled);
        }
        self.acquire_semantic_lock(saga_id, at)?;
        self.reserve(quantity)?;
        self.mark_reserved();
        self.holds.insert(
            saga_id.clone(),
            SagaHold {
                quantity,
                stage: HoldStage::Reserved,
            },
        );
        Ok(Settlement::Applied)
    }

    /// Confirm step for a saga.
    pub fn apply_confirm(&mut self, saga_id: &SagaId, quantity: u32) -> Result<Settlement> {
        match self.hold(saga_id).map(|h| h.stage) {
            Some(HoldStage::Confirmed) => Ok(Settlement::AlreadySettled),
            Some(HoldStage::Reserved) => {
                self.validate_ownership(saga_id)?;
                self.confirm_reservation(quantity)?;
                self.set_stage(saga_id, quantity, HoldStage::Confirmed);
                Ok(Settlement::Applied)
            }
            Some(HoldStage::Cancelled) | None => {
                self.validate_ownership(saga_id)?;
                Err(self.no_reservation(saga_id, "confirm"))
            }
        }
    }

    /// Cancel step for a saga.
    ///
    /// Cancelling a confirmed reservation puts the sold units back into
    /// stock without touching whoever holds the lock now. A saga with no
    /// hold on the record is an error, never a silent no-op.
    pub fn apply_cancel(&mut self, saga_id: &SagaId, quantity: u32) -> Result<CancelOutcome> {
        let Some(hold) = self.hold(saga_id) else {
            self.validate_ownership(saga_id)?;
            return Err(self.no_reservation(saga_id, "cancel"));
        };
        match hold.stage {
            HoldStage::Cancelled => Ok(CancelOutcome {
                settlement: Settlement::AlreadySettled,
                underflow: 0,
            }),
            HoldStage::Confirmed => {
                self.add_stock(hold.quantity);
                self.set_stage(saga_id, hold.quantity, HoldStage::Cancelled);
                Ok(CancelOutcome {
                    settlement: Settlement::Applied,
                    underflow: 0,
                })
            }
            HoldStage::Reserved => {
                self.validate_ownership(saga_id)?;
                let underflow = self.cancel_reservation(quantity);
                self.set_stage(saga_id, quantity, HoldStage::Cancelled);
                Ok(CancelOutcome {
                    settlement: Settlement::Applied,
                    underflow,
                })
            }
        }
    }

    /// Drops the saga's hold once the saga has ended. Returns false if there
    /// was none.
    ///
    /// An open reservation is not released here; it has to be confirmed or
    /// cancelled first.
    pub fn release_hold(&mut self, saga_id: &SagaId) -> Result<bool> {
        match self.hold(saga_id).map(|h| h.stage) {
            None => Ok(false),
            Some(HoldStage::Reserved) => Err(DomainError::InvalidStateTransition {
                entity: "reservation",
                id: format!("{}/{}", self.product_id, saga_id),
                status: "RESERVED",
                action: "release",
            }),
            Some(HoldStage::Confirmed | HoldStage::Cancelled) => {
                self.holds.remove(saga_id);
                Ok(true)
            }
        }
    }

    /// Stamps a committed change.
    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at;
    }

    fn set_stage(&mut self, saga_id: &SagaId, quantity: u32, stage: HoldStage) {
        self.holds
            .insert(saga_id.clone(), SagaHold { quantity, stage });
    }

    fn no_reservation(&self, saga_id: &SagaId, action: &'static str) -> DomainError {
        DomainError::ReservationNotFound {
            product_id: self.product_id.clone(),
            saga_id: saga_id.clone(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: u32) -> InventoryRecord {
        InventoryRecord::new(ProductId::new("SKU-1"), total, Utc::now())
    }

    fn saga(id: &str) -> SagaId {
        SagaId::new(id)
    }

    fn assert_invariants(r: &InventoryRecord) {
        assert!(r.reserved_quantity <= r.total_quantity);
        assert_eq!(r.owner_saga_id.is_some(), r.status.is_locked());
    }

    #[test]
    fn test_new_record_is_available() {
        let r = record(10);
        assert_eq!(r.status, ReservationStatus::Available);
        assert_eq!(r.available_quantity(), 10);
        assert_invariants(&r);
    }

    #[test]
    fn test_acquire_is_reentrant_for_owner() {
        let mut r = record(10);
        r.acquire_semantic_lock(&saga("A"), Utc::now()).unwrap();
        r.reserve(2).unwrap();
        r.mark_reserved();
        r.acquire_semantic_lock(&saga("A"), Utc::now()).unwrap();
        assert_eq!(r.owner_saga_id, Some(saga("A")));
    }

    #[test]
    fn test_acquire_rejects_other_saga_while_reserved() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();

        let err = r.acquire_semantic_lock(&saga("B"), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::LockedByOtherSaga { .. }));
        assert_eq!(r.owner_saga_id, Some(saga("A")));
    }

    #[test]
    fn test_reserve_checks_available() {
        let mut r = record(3);
        let err = r.apply_reserve(&saga("A"), 4, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_reserve_then_confirm_reduces_total() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        assert_eq!(r.available_quantity(), 8);
        assert_eq!(r.status, ReservationStatus::Reserved);

        r.apply_confirm(&saga("A"), 2).unwrap();
        assert_eq!(r.total_quantity, 8);
        assert_eq!(r.reserved_quantity, 0);
        assert_eq!(r.status, ReservationStatus::Available);
        assert_invariants(&r);
    }

    #[test]
    fn test_confirm_by_other_saga_is_rejected() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        let err = r.apply_confirm(&saga("B"), 2).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOwnership { .. }));
    }

    #[test]
    fn test_confirm_more_than_reserved_fails() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        let err = r.apply_confirm(&saga("A"), 3).unwrap_err();
        assert!(matches!(err, DomainError::ReservationUnderflow { .. }));
    }

    #[test]
    fn test_cancel_releases_lock() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        let outcome = r.apply_cancel(&saga("A"), 2).unwrap();

        assert_eq!(outcome.settlement, Settlement::Applied);
        assert_eq!(outcome.underflow, 0);
        assert_eq!(r.reserved_quantity, 0);
        assert_eq!(r.total_quantity, 10);
        assert_eq!(r.status, ReservationStatus::Available);
        assert_invariants(&r);
    }

    #[test]
    fn test_cancel_clamps_at_zero() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        let outcome = r.apply_cancel(&saga("A"), 5).unwrap();
        assert_eq!(outcome.underflow, 3);
        assert_eq!(r.reserved_quantity, 0);
    }

    #[test]
    fn test_repeated_operations_are_idempotent() {
        let mut r = record(10);
        let now = Utc::now();
        assert_eq!(
            r.apply_reserve(&saga("A"), 2, now).unwrap(),
            Settlement::Applied
        );
        assert_eq!(
            r.apply_reserve(&saga("A"), 2, now).unwrap(),
            Settlement::AlreadySettled
        );
        assert_eq!(r.reserved_quantity, 2);

        r.apply_cancel(&saga("A"), 2).unwrap();
        let again = r.apply_cancel(&saga("A"), 2).unwrap();
        assert_eq!(again.settlement, Settlement::AlreadySettled);
        assert_eq!(r.reserved_quantity, 0);
    }

    #[test]
    fn test_cancel_without_reservation_fails() {
        let mut r = record(10);
        let err = r.apply_cancel(&saga("A"), 2).unwrap_err();
        assert!(matches!(err, DomainError::ReservationNotFound { .. }));
        assert_eq!(err.code(), "RESERVATION_NOT_FOUND");
        assert_eq!(r.total_quantity, 10);
    }

    #[test]
    fn test_cancel_by_stranger_while_locked_is_invalid_ownership() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        let err = r.apply_cancel(&saga("B"), 2).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOwnership { .. }));
        assert_eq!(r.reserved_quantity, 2);
    }

    #[test]
    fn test_confirm_after_cancel_fails() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        r.apply_cancel(&saga("A"), 2).unwrap();
        let err = r.apply_confirm(&saga("A"), 2).unwrap_err();
        assert!(matches!(err, DomainError::ReservationNotFound { .. }));
        assert_eq!(r.total_quantity, 10);
    }

    #[test]
    fn test_cancel_after_confirm_restocks() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        r.apply_confirm(&saga("A"), 2).unwrap();
        r.apply_reserve(&saga("B"), 1, Utc::now()).unwrap();

        let outcome = r.apply_cancel(&saga("A"), 2).unwrap();
        assert_eq!(outcome.settlement, Settlement::Applied);
        assert_eq!(r.total_quantity, 10);
        assert_eq!(r.reserved_quantity, 1);
        assert_eq!(r.owner_saga_id, Some(saga("B")));

        let again = r.apply_cancel(&saga("A"), 2).unwrap();
        assert_eq!(again.settlement, Settlement::AlreadySettled);
        assert_eq!(r.total_quantity, 10);
    }

    #[test]
    fn test_confirmed_hold_outlives_many_other_sagas() {
        let mut r = record(200);
        let now = Utc::now();
        r.apply_reserve(&saga("A"), 2, now).unwrap();
        r.apply_confirm(&saga("A"), 2).unwrap();
        for i in 0..100 {
            let other = saga(&format!("S-{i}"));
            r.apply_reserve(&other, 1, now).unwrap();
            r.apply_confirm(&other, 1).unwrap();
            r.release_hold(&other).unwrap();
        }
        assert_eq!(r.total_quantity, 98);

        let outcome = r.apply_cancel(&saga("A"), 2).unwrap();
        assert_eq!(outcome.settlement, Settlement::Applied);
        assert_eq!(r.total_quantity, 100);
        assert_eq!(r.hold_count(), 1);
    }

    #[test]
    fn test_repeated_reserve_never_double_counts() {
        let mut r = record(100);
        let now = Utc::now();
        r.apply_reserve(&saga("A"), 2, now).unwrap();
        r.apply_confirm(&saga("A"), 2).unwrap();
        for i in 0..70 {
            let other = saga(&format!("S-{i}"));
            r.apply_reserve(&other, 1, now).unwrap();
            r.apply_cancel(&other, 1).unwrap();
        }

        let again = r.apply_reserve(&saga("A"), 2, now).unwrap();
        assert_eq!(again, Settlement::AlreadySettled);
        assert_eq!(r.reserved_quantity, 0);
        assert_eq!(r.total_quantity, 98);
    }

    #[test]
    fn test_release_hold() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        assert!(matches!(
            r.release_hold(&saga("A")),
            Err(DomainError::InvalidStateTransition { .. })
        ));

        r.apply_confirm(&saga("A"), 2).unwrap();
        assert!(r.release_hold(&saga("A")).unwrap());
        assert!(!r.release_hold(&saga("A")).unwrap());
        assert_eq!(r.hold(&saga("A")), None);
        assert_eq!(r.hold_count(), 0);
    }

    #[test]
    fn test_holds_survive_serialization() {
        let mut r = record(10);
        r.apply_reserve(&saga("A"), 2, Utc::now()).unwrap();
        r.apply_confirm(&saga("A"), 2).unwrap();

        let json = serde_json::to_string(&r).unwrap();
        let mut restored: InventoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, r);
        assert_eq!(
            restored.hold(&saga("A")),
            Some(SagaHold {
                quantity: 2,
                stage: HoldStage::Confirmed,
            })
        );

        restored.apply_cancel(&saga("A"), 2).unwrap();
        assert_eq!(restored.total_quantity, 10);
    }

    #[test]
    fn test_locked_scenario_then_release() {
        let mut r = record(10);
        let now = Utc::now();
        r.apply_reserve(&saga("S1"), 2, now).unwrap();
        assert_eq!(r.available_quantity(), 8);

        assert!(matches!(
            r.apply_reserve(&saga("S2"), 1, now),
            Err(DomainError::LockedByOtherSaga { .. })
        ));

        r.apply_cancel(&saga("S1"), 2).unwrap();
        assert_eq!(r.status, ReservationStatus::Available);

        r.apply_reserve(&saga("S2"), 1, now).unwrap();
        assert_eq!(r.owner_saga_id, Some(saga("S2")));
        assert_invariants(&r);
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&ReservationStatus::Reserved).unwrap();
        assert_eq!(json, "\"RESERVED\"");
    }
}

//! Inventory service: every mutation runs under the product's mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{ProductId, SagaId};
use coordination::DistributedMutex;
use outbox::InMemoryOutboxStore;
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};
use crate::event::DomainEvent;

use super::events::{InventoryEvent, ProductRegisteredData, StockAddedData, StockMovementData};
use super::record::{InventoryRecord, Settlement};

/// Default time to wait for a product's mutex.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Mutex key guarding one product.
pub fn lock_key(product_id: &ProductId) -> String {
    format!("lock:inventory:{product_id}")
}

/// Owns inventory records and the reserve/confirm/cancel steps sagas call.
///
/// A mutation takes the product's [`DistributedMutex`], reads the record,
/// applies the semantic-lock transition to a copy and commits the copy
/// together with its outbox event. The record's `version` is re-checked at
/// commit, so a writer that bypassed the mutex surfaces as
/// [`DomainError::VersionConflict`] instead of a lost update.
#[derive(Clone)]
pub struct InventoryService<M> {
    products: Arc<RwLock<HashMap<ProductId, InventoryRecord>>>,
    outbox: InMemoryOutboxStore,
    mutex: M,
    lock_wait: Duration,
}

impl<M: DistributedMutex> InventoryService<M> {
    pub fn new(mutex: M, outbox: InMemoryOutboxStore) -> Self {
        Self {
            products: Arc::new(RwLock::new(HashMap::new())),
            outbox,
            mutex,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Sets how long a mutation waits for the product's mutex.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    /// Registers a product with its initial stock.
    #[tracing::instrument(skip(self))]
    pub async fn register_product(
        &self,
        product_id: ProductId,
        total_quantity: u32,
    ) -> Result<InventoryRecord> {
        let _guard = self.mutex.acquire(&lock_key(&product_id), self.lock_wait).await?;
        let now = Utc::now();
        let record = InventoryRecord::new(product_id.clone(), total_quantity, now);
        let event = InventoryEvent::ProductRegistered(ProductRegisteredData {
            product_id: product_id.clone(),
            total_quantity,
            registered_at: now,
        })
        .to_outbox()?;

        let mut products = self.products.write().await;
        let record = self
            .outbox
            .transaction(|tx| {
                if products.contains_key(&product_id) {
                    return Err(DomainError::ProductAlreadyExists(product_id.clone()));
                }
                tx.stage(event);
                products.insert(product_id.clone(), record.clone());
                Ok(record)
            })
            .await?;
        tracing::info!(%product_id, total_quantity, "product registered");
        Ok(record)
    }

    /// Adds units to a product's stock.
    #[tracing::instrument(skip(self))]
    pub async fn add_stock(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        ensure_positive(quantity)?;
        self.mutate(product_id, |record, now| {
            record.add_stock(quantity);
            Ok(Some(InventoryEvent::StockAdded(StockAddedData {
                product_id: record.product_id.clone(),
                added: quantity,
                total_quantity: record.total_quantity,
                added_at: now,
            })))
        })
        .await
    }

    /// Returns the current record.
    pub async fn get(&self, product_id: &ProductId) -> Result<InventoryRecord> {
        self.products
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| DomainError::ProductNotFound(product_id.clone()))
    }

    /// Takes the semantic lock for `saga_id` and reserves `quantity` units.
    ///
    /// Repeating the call for the same saga returns the current record
    /// without reserving again.
    #[tracing::instrument(skip(self, product_id, saga_id), fields(product_id = %product_id, saga_id = %saga_id))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> Result<InventoryRecord> {
        ensure_positive(quantity)?;
        let result = self
            .mutate(product_id, |record, now| {
                match record.apply_reserve(saga_id, quantity, now)? {
                    Settlement::AlreadySettled => Ok(None),
                    Settlement::Applied => Ok(Some(InventoryEvent::StockReserved(movement(
                        record, saga_id, quantity, now,
                    )))),
                }
            })
            .await;
        match &result {
            Ok(record) => tracing::info!(
                quantity,
                available = record.available_quantity(),
                "stock reserved"
            ),
            Err(e) => tracing::warn!(error = %e, "reservation rejected"),
        }
        result
    }

    /// Turns the saga's reservation into a sale and releases the lock.
    #[tracing::instrument(skip(self, product_id, saga_id), fields(product_id = %product_id, saga_id = %saga_id))]
    pub async fn confirm(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> Result<InventoryRecord> {
        ensure_positive(quantity)?;
        let record = self
            .mutate(product_id, |record, now| {
                match record.apply_confirm(saga_id, quantity)? {
                    Settlement::AlreadySettled => Ok(None),
                    Settlement::Applied => Ok(Some(InventoryEvent::StockReservationConfirmed(
                        movement(record, saga_id, quantity, now),
                    ))),
                }
            })
            .await?;
        tracing::info!(quantity, total = record.total_quantity, "reservation confirmed");
        Ok(record)
    }

    /// Returns the saga's reservation to stock and releases the lock.
    ///
    /// If less than `quantity` is reserved the reserved count stops at zero;
    /// the shortfall is logged and counted as
    /// `inventory_cancel_underflow_total`.
    #[tracing::instrument(skip(self, product_id, saga_id), fields(product_id = %product_id, saga_id = %saga_id))]
    pub async fn cancel(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> Result<InventoryRecord> {
        ensure_positive(quantity)?;
        let record = self
            .mutate(product_id, |record, now| {
                let outcome = record.apply_cancel(saga_id, quantity)?;
                if outcome.underflow > 0 {
                    metrics::counter!("inventory_cancel_underflow_total").increment(1);
                    tracing::warn!(
                        requested = quantity,
                        underflow = outcome.underflow,
                        "cancel exceeded reserved quantity, clamped at zero"
                    );
                }
                match outcome.settlement {
                    Settlement::AlreadySettled => Ok(None),
                    Settlement::Applied => Ok(Some(InventoryEvent::StockReservationCancelled(
                        movement(record, saga_id, quantity, now),
                    ))),
                }
            })
            .await?;
        tracing::info!(quantity, "reservation cancelled");
        Ok(record)
    }

    /// Drops the saga's hold on the product once the saga has ended.
    ///
    /// Releasing a hold that is already gone changes nothing. An open
    /// reservation cannot be released.
    #[tracing::instrument(skip(self, product_id, saga_id), fields(product_id = %product_id, saga_id = %saga_id))]
    pub async fn release_hold(
        &self,
        product_id: &ProductId,
        saga_id: &SagaId,
    ) -> Result<InventoryRecord> {
        self.mutate(product_id, |record, _| {
            if record.release_hold(saga_id)? {
                tracing::debug!("saga hold released");
            }
            Ok(None)
        })
        .await
    }

    /// Runs `change` on a copy of the record and commits it with its event.
    ///
    /// If the copy comes back unchanged the stored record is returned as is
    /// and nothing is written.
    async fn mutate<F>(&self, product_id: &ProductId, change: F) -> Result<InventoryRecord>
    where
        F: FnOnce(&mut InventoryRecord, DateTime<Utc>) -> Result<Option<InventoryEvent>>,
    {
        let _guard = self.mutex.acquire(&lock_key(product_id), self.lock_wait).await?;

        let current = self.get(product_id).await?;
        let now = Utc::now();
        let mut next = current.clone();
        let event = change(&mut next, now)?;
        if next == current {
            return Ok(current);
        }
        next.touch(now);
        let event = event.map(|e| e.to_outbox()).transpose()?;

        let mut products = self.products.write().await;
        self.outbox
            .transaction(|tx| {
                let actual = products.get(product_id).map_or(0, |r| r.version);
                if actual != current.version {
                    return Err(DomainError::VersionConflict {
                        product_id: product_id.clone(),
                        expected: current.version,
                        actual,
                    });
                }
                if let Some(event) = event {
                    tx.stage(event);
                }
                products.insert(product_id.clone(), next.clone());
                Ok(next)
            })
            .await
    }
}

fn ensure_positive(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(DomainError::InvalidQuantity);
    }
    Ok(())
}

fn movement(
    record: &InventoryRecord,
    saga_id: &SagaId,
    quantity: u32,
    at: DateTime<Utc>,
) -> StockMovementData {
    StockMovementData {
        product_id: record.product_id.clone(),
        saga_id: saga_id.clone(),
        quantity,
        available_quantity: record.available_quantity(),
        occurred_at: at,
    }
}

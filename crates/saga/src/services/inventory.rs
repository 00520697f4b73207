//! Inventory participant.

use async_trait::async_trait;
use common::{ProductId, SagaId};
use coordination::DistributedMutex;
use domain::InventoryService;

/// Stock step operations. Each is idempotent for a repeated
/// `(product, saga, operation)` triple.
#[async_trait]
pub trait InventoryParticipant: Send + Sync {
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()>;

    async fn confirm(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()>;

    /// Compensation for [`reserve`](Self::reserve).
    async fn cancel(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()>;

    /// Tells the participant the saga is over and its bookkeeping can go.
    async fn release(&self, product_id: &ProductId, saga_id: &SagaId) -> domain::Result<()>;
}

#[async_trait]
impl<M: DistributedMutex> InventoryParticipant for InventoryService<M> {
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()> {
        InventoryService::reserve(self, product_id, quantity, saga_id)
            .await
            .map(|_| ())
    }

    async fn confirm(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()> {
        InventoryService::confirm(self, product_id, quantity, saga_id)
            .await
            .map(|_| ())
    }

    async fn cancel(
        &self,
        product_id: &ProductId,
        quantity: u32,
        saga_id: &SagaId,
    ) -> domain::Result<()> {
        InventoryService::cancel(self, product_id, quantity, saga_id)
            .await
            .map(|_| ())
    }

    async fn release(&self, product_id: &ProductId, saga_id: &SagaId) -> domain::Result<()> {
        InventoryService::release_hold(self, product_id, saga_id)
            .await
            .map(|_| ())
    }
}

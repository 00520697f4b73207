use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{DeadLetterRecord, OutboxId, OutboxRecord, OutboxStats, Result};

/// Persistence for outbox and dead-letter records.
///
/// Every multi-row operation is atomic: a claim either flips all returned
/// rows to `PROCESSING` or none, and dead-lettering copies and deletes in one
/// unit. Implementations must be safe to share between relay instances.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stores a new record on its own.
    ///
    /// Producers that change domain state should use the store's
    /// transactional entry point instead so both commit together.
    async fn save(&self, record: OutboxRecord) -> Result<()>;

    /// Claims up to `limit` pending records, oldest first.
    ///
    /// Rows held by another claimer are skipped rather than waited on. The
    /// returned records are already `PROCESSING` with `processed_at = at`.
    async fn claim_batch(&self, limit: usize, at: DateTime<Utc>) -> Result<Vec<OutboxRecord>>;

    /// Marks a claimed record as delivered.
    async fn mark_published(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()>;

    /// Marks a claimed record as failed, incrementing its retry count.
    async fn mark_failed(&self, id: OutboxId, error: &str, at: DateTime<Utc>) -> Result<()>;

    /// Failed records with `retry_count < max_retry`, oldest failure first.
    async fn find_failed_for_retry(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>>;

    /// Returns a failed record to `PENDING`.
    async fn mark_for_retry(&self, id: OutboxId) -> Result<()>;

    /// Moves up to `limit` failed records with `retry_count >= max_retry`
    /// into the dead-letter store, deleting them from the outbox.
    async fn move_exhausted_to_dead_letter(
        &self,
        max_retry: u32,
        limit: usize,
        at: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterRecord>>;

    /// Reverts up to `limit` claims taken before `claimed_before` to
    /// `PENDING`. Returns the number reverted.
    async fn recover_timed_out(&self, claimed_before: DateTime<Utc>, limit: usize)
    -> Result<u64>;

    /// Deletes published records older than `published_before`.
    async fn delete_published_before(&self, published_before: DateTime<Utc>) -> Result<u64>;

    /// Counts records by status.
    async fn stats(&self) -> Result<OutboxStats>;

    /// Looks up a record by id.
    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>>;

    /// Lists dead letters, newest first.
    async fn dead_letters(&self, include_resolved: bool) -> Result<Vec<DeadLetterRecord>>;

    /// Marks a dead letter as resolved with an operator note.
    async fn resolve_dead_letter(
        &self,
        id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<DeadLetterRecord>;
}

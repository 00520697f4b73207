use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    DeadLetterRecord, OutboxError, OutboxId, OutboxRecord, OutboxStats, OutboxStatus, Result,
    store::OutboxStore,
};

#[derive(Default)]
struct State {
    records: Vec<OutboxRecord>,
    dead_letters: Vec<DeadLetterRecord>,
}

impl State {
    fn record_mut(&mut self, id: OutboxId) -> Result<&mut OutboxRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::RecordNotFound(id))
    }
}

/// Records staged inside [`InMemoryOutboxStore::transaction`].
#[derive(Debug, Default)]
pub struct OutboxTx {
    staged: Vec<OutboxRecord>,
}

impl OutboxTx {
    /// Adds a record to be committed with the surrounding unit of work.
    pub fn stage(&mut self, record: OutboxRecord) {
        self.staged.push(record);
    }

    /// Records staged so far.
    pub fn staged(&self) -> &[OutboxRecord] {
        &self.staged
    }
}

/// In-memory outbox store.
///
/// Used by the default binary and by tests. Shares the same contract as the
/// PostgreSQL implementation, including atomic claims.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOutboxStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` as one unit with the records it stages.
    ///
    /// The store stays write-locked for the duration, so a caller that
    /// commits its own domain state inside `work` makes that state and the
    /// staged records visible together. If `work` fails nothing is stored.
    pub async fn transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut OutboxTx) -> std::result::Result<T, E>,
    {
        let mut state = self.state.write().await;
        let mut tx = OutboxTx::default();
        let value = work(&mut tx)?;
        tracing::debug!(records = tx.staged.len(), "outbox transaction committed");
        state.records.extend(tx.staged);
        Ok(value)
    }

    /// All records currently in the outbox, in insertion order.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.state.read().await.records.clone()
    }

    /// Records for one aggregate, in insertion order.
    pub async fn records_for(&self, aggregate_id: &str) -> Vec<OutboxRecord> {
        self.state
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    /// Number of records currently in the outbox.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Overwrites a stored record. Test hook for simulating aged rows.
    pub async fn replace(&self, record: OutboxRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state.record_mut(record.id)?;
        *slot = record;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save(&self, record: OutboxRecord) -> Result<()> {
        self.state.write().await.records.push(record);
        Ok(())
    }

    async fn claim_batch(&self, limit: usize, at: DateTime<Utc>) -> Result<Vec<OutboxRecord>> {
        let mut state = self.state.write().await;
        let mut pending: Vec<usize> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == OutboxStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| state.records[i].created_at);
        pending.truncate(limit);

        let mut claimed = Vec::with_capacity(pending.len());
        for i in pending {
            let record = &mut state.records[i];
            record.mark_processing(at)?;
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn mark_published(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()> {
        self.state.write().await.record_mut(id)?.mark_published(at)
    }

    async fn mark_failed(&self, id: OutboxId, error: &str, at: DateTime<Utc>) -> Result<()> {
        self.state
            .write()
            .await
            .record_mut(id)?
            .mark_failed(error, at)
    }

    async fn find_failed_for_retry(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let state = self.state.read().await;
        let mut failed: Vec<_> = state
            .records
            .iter()
            .filter(|r| r.status == OutboxStatus::Failed && r.retry_count < max_retry)
            .cloned()
            .collect();
        failed.sort_by_key(|r| r.last_failed_at);
        failed.truncate(limit);
        Ok(failed)
    }

    async fn mark_for_retry(&self, id: OutboxId) -> Result<()> {
        self.state.write().await.record_mut(id)?.mark_for_retry()
    }

    async fn move_exhausted_to_dead_letter(
        &self,
        max_retry: u32,
        limit: usize,
        at: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterRecord>> {
        let mut state = self.state.write().await;
        let exhausted: Vec<OutboxId> = state
            .records
            .iter()
            .filter(|r| r.status == OutboxStatus::Failed && r.retry_count >= max_retry)
            .take(limit)
            .map(|r| r.id)
            .collect();

        let mut moved = Vec::with_capacity(exhausted.len());
        for id in exhausted {
            if let Some(pos) = state.records.iter().position(|r| r.id == id) {
                let record = state.records.remove(pos);
                let dead = DeadLetterRecord::from_exhausted(&record, at);
                state.dead_letters.push(dead.clone());
                moved.push(dead);
            }
        }
        Ok(moved)
    }

    async fn recover_timed_out(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut recovered = 0;
        for record in state
            .records
            .iter_mut()
            .filter(|r| {
                r.status == OutboxStatus::Processing
                    && r.processed_at.is_some_and(|t| t < claimed_before)
            })
            .take(limit)
        {
            record.mark_timed_out()?;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn delete_published_before(&self, published_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| {
            !(r.status == OutboxStatus::Published
                && r.published_at.is_some_and(|t| t < published_before))
        });
        Ok((before - state.records.len()) as u64)
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let state = self.state.read().await;
        let mut stats = OutboxStats::default();
        for record in &state.records {
            match record.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Published => stats.published += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        stats.dead_lettered = state.dead_letters.len() as u64;
        stats.unresolved_dead_letters =
            state.dead_letters.iter().filter(|d| !d.resolved).count() as u64;
        Ok(stats)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        let state = self.state.read().await;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn dead_letters(&self, include_resolved: bool) -> Result<Vec<DeadLetterRecord>> {
        let state = self.state.read().await;
        let mut letters: Vec<_> = state
            .dead_letters
            .iter()
            .filter(|d| include_resolved || !d.resolved)
            .cloned()
            .collect();
        letters.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(letters)
    }

    async fn resolve_dead_letter(
        &self,
        id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<DeadLetterRecord> {
        let mut state = self.state.write().await;
        let dead = state
            .dead_letters
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(OutboxError::DeadLetterNotFound(id))?;
        dead.resolve(note, at);
        Ok(dead.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(event_type: &str) -> OutboxRecord {
        OutboxRecord::new("order", "o-1", event_type, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_claim_flips_to_processing_and_hides_rows() {
        let store = InMemoryOutboxStore::new();
        for i in 0..3 {
            store.save(record(&format!("E{i}"))).await.unwrap();
        }

        let now = Utc::now();
        let first = store.claim_batch(2, now).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.status == OutboxStatus::Processing));
        assert_eq!(first[0].event_type, "E0");

        let second = store.claim_batch(10, now).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event_type, "E2");

        assert!(store.claim_batch(10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_orders_by_creation_time() {
        let store = InMemoryOutboxStore::new();
        let mut late = record("Late");
        late.created_at = Utc::now();
        let mut early = record("Early");
        early.created_at = late.created_at - Duration::seconds(5);
        store.save(late).await.unwrap();
        store.save(early).await.unwrap();

        let claimed = store.claim_batch(1, Utc::now()).await.unwrap();
        assert_eq!(claimed[0].event_type, "Early");
    }

    #[tokio::test]
    async fn test_transaction_commits_staged_records() {
        let store = InMemoryOutboxStore::new();
        let value: std::result::Result<u32, OutboxError> = store
            .transaction(|tx| {
                tx.stage(record("A"));
                tx.stage(record("B"));
                Ok(7)
            })
            .await;
        assert_eq!(value.unwrap(), 7);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_transaction_stores_nothing() {
        let store = InMemoryOutboxStore::new();
        let result: std::result::Result<(), &str> = store
            .transaction(|tx| {
                tx.stage(record("A"));
                Err("domain write rejected")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_dead_letter_moves_exactly_once() {
        let store = InMemoryOutboxStore::new();
        let mut r = record("A");
        r.status = OutboxStatus::Failed;
        r.retry_count = 5;
        let id = r.id;
        store.save(r).await.unwrap();

        let now = Utc::now();
        let moved = store.move_exhausted_to_dead_letter(5, 100, now).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].original_id, id);
        assert!(store.get(id).await.unwrap().is_none());

        let again = store.move_exhausted_to_dead_letter(5, 100, now).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(store.dead_letters(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_dead_letter() {
        let store = InMemoryOutboxStore::new();
        let mut r = record("A");
        r.status = OutboxStatus::Failed;
        r.retry_count = 5;
        store.save(r).await.unwrap();
        let moved = store
            .move_exhausted_to_dead_letter(5, 100, Utc::now())
            .await
            .unwrap();

        let resolved = store
            .resolve_dead_letter(moved[0].id, "republished manually", Utc::now())
            .await
            .unwrap();
        assert!(resolved.resolved);
        assert!(store.dead_letters(false).await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.unresolved_dead_letters, 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_dead_letter() {
        let store = InMemoryOutboxStore::new();
        let err = store
            .resolve_dead_letter(Uuid::new_v4(), "n/a", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::DeadLetterNotFound(_)));
    }

    #[tokio::test]
    async fn test_recover_only_stale_claims() {
        let store = InMemoryOutboxStore::new();
        store.save(record("Stale")).await.unwrap();
        store.save(record("Fresh")).await.unwrap();

        let now = Utc::now();
        let claimed = store.claim_batch(1, now - Duration::minutes(10)).await.unwrap();
        assert_eq!(claimed[0].event_type, "Stale");
        store.claim_batch(1, now).await.unwrap();

        let recovered = store
            .recover_timed_out(now - Duration::minutes(5), 100)
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let stale = store.get(claimed[0].id).await.unwrap().unwrap();
        assert_eq!(stale.status, OutboxStatus::Pending);
        assert!(stale.processed_at.is_none());
        assert_eq!(store.stats().await.unwrap().processing, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_published_only() {
        let store = InMemoryOutboxStore::new();
        store.save(record("Old")).await.unwrap();
        store.save(record("New")).await.unwrap();
        store.save(record("Waiting")).await.unwrap();

        let now = Utc::now();
        let claimed = store.claim_batch(2, now).await.unwrap();
        store
            .mark_published(claimed[0].id, now - Duration::days(8))
            .await
            .unwrap();
        store.mark_published(claimed[1].id, now).await.unwrap();

        let deleted = store
            .delete_published_before(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.record_count().await, 2);
    }
}

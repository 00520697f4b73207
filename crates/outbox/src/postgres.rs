use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DeadLetterRecord, OutboxError, OutboxId, OutboxRecord, OutboxStats, OutboxStatus, Result,
    store::OutboxStore,
};

const RECORD_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, status, \
     retry_count, created_at, processed_at, published_at, last_failed_at, last_error";

const DEAD_LETTER_COLUMNS: &str = "id, original_id, aggregate_type, aggregate_id, event_type, \
     payload, retry_count, last_error, original_created_at, failed_at, resolved, resolved_at, \
     resolution_note";

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed outbox store.
///
/// Claims use `FOR UPDATE SKIP LOCKED` so several relay instances can poll
/// the same table without handing out a row twice.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts `record` inside the caller's transaction.
    ///
    /// Use this from the same transaction as the domain write the record
    /// reports; the row becomes claimable only when that transaction commits.
    pub async fn save_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &OutboxRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, payload, status, retry_count,
                 created_at, processed_at, published_at, last_failed_at, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.aggregate_type)
        .bind(&record.aggregate_id)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(to_i32(record.retry_count))
        .bind(record.created_at)
        .bind(record.processed_at)
        .bind(record.published_at)
        .bind(record.last_failed_at)
        .bind(&record.last_error)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<OutboxRecord> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(OutboxRecord {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            published_at: row.try_get("published_at")?,
            last_failed_at: row.try_get("last_failed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetterRecord> {
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(DeadLetterRecord {
            id: row.try_get("id")?,
            original_id: OutboxId::from_uuid(row.try_get::<Uuid, _>("original_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            last_error: row.try_get("last_error")?,
            original_created_at: row.try_get("original_created_at")?,
            failed_at: row.try_get("failed_at")?,
            resolved: row.try_get("resolved")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution_note: row.try_get("resolution_note")?,
        })
    }

    /// Builds the error for a conditional update that matched no row.
    async fn transition_error(&self, id: OutboxId, to: OutboxStatus) -> OutboxError {
        match self.get(id).await {
            Ok(Some(record)) => OutboxError::InvalidTransition {
                id,
                from: record.status,
                to,
            },
            Ok(None) => OutboxError::RecordNotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn save(&self, record: OutboxRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::save_in_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn claim_batch(&self, limit: usize, at: DateTime<Utc>) -> Result<Vec<OutboxRecord>> {
        let mut tx = self.pool.begin().await?;

        // Select and flip in one statement so the row locks released at
        // commit never expose these rows as PENDING again.
        let rows = sqlx::query(
            r#"
            WITH claimed AS (
                SELECT id FROM outbox_events
                WHERE status = 'PENDING'
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events o
            SET status = 'PROCESSING', processed_at = $2
            FROM claimed
            WHERE o.id = claimed.id
            RETURNING o.*
            "#,
        )
        .bind(to_i64(limit))
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn mark_published(&self, id: OutboxId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PUBLISHED', published_at = $2
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, OutboxStatus::Published).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'FAILED',
                retry_count = retry_count + 1,
                last_error = $2,
                last_failed_at = $3
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, OutboxStatus::Failed).await);
        }
        Ok(())
    }

    async fn find_failed_for_retry(
        &self,
        max_retry: u32,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM outbox_events
            WHERE status = 'FAILED' AND retry_count < $1
            ORDER BY last_failed_at ASC NULLS FIRST
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(to_i32(max_retry))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_for_retry(&self, id: OutboxId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET status = 'PENDING' WHERE id = $1 AND status = 'FAILED'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, OutboxStatus::Pending).await);
        }
        Ok(())
    }

    async fn move_exhausted_to_dead_letter(
        &self,
        max_retry: u32,
        limit: usize,
        at: DateTime<Utc>,
    ) -> Result<Vec<DeadLetterRecord>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM outbox_events
            WHERE status = 'FAILED' AND retry_count >= $1
            ORDER BY last_failed_at ASC NULLS FIRST
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(to_i32(max_retry))
            .bind(to_i64(limit))
            .fetch_all(&mut *tx)
            .await?;

        let mut moved = Vec::with_capacity(rows.len());
        for row in rows {
            let record = Self::row_to_record(row)?;
            let dead = DeadLetterRecord::from_exhausted(&record, at);

            sqlx::query(
                r#"
                INSERT INTO outbox_dead_letters
                    (id, original_id, aggregate_type, aggregate_id, event_type, payload,
                     retry_count, last_error, original_created_at, failed_at, resolved)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
                ON CONFLICT (original_id) DO NOTHING
                "#,
            )
            .bind(dead.id)
            .bind(dead.original_id.as_uuid())
            .bind(&dead.aggregate_type)
            .bind(&dead.aggregate_id)
            .bind(&dead.event_type)
            .bind(&dead.payload)
            .bind(to_i32(dead.retry_count))
            .bind(&dead.last_error)
            .bind(dead.original_created_at)
            .bind(dead.failed_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM outbox_events WHERE id = $1")
                .bind(record.id.as_uuid())
                .execute(&mut *tx)
                .await?;

            moved.push(dead);
        }

        tx.commit().await?;
        Ok(moved)
    }

    async fn recover_timed_out(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING', processed_at = NULL
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'PROCESSING' AND processed_at < $1
                ORDER BY processed_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(claimed_before)
        .bind(to_i64(limit))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_published_before(&self, published_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'PUBLISHED' AND published_at < $1",
        )
        .bind(published_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_events GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = u64::try_from(n).unwrap_or(0);
            match status.parse()? {
                OutboxStatus::Pending => stats.pending = n,
                OutboxStatus::Processing => stats.processing = n,
                OutboxStatus::Published => stats.published = n,
                OutboxStatus::Failed => stats.failed = n,
            }
        }

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE NOT resolved) AS unresolved
            FROM outbox_dead_letters
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        stats.dead_lettered = u64::try_from(row.try_get::<i64, _>("total")?).unwrap_or(0);
        stats.unresolved_dead_letters =
            u64::try_from(row.try_get::<i64, _>("unresolved")?).unwrap_or(0);

        Ok(stats)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM outbox_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn dead_letters(&self, include_resolved: bool) -> Result<Vec<DeadLetterRecord>> {
        let sql = format!(
            r#"
            SELECT {DEAD_LETTER_COLUMNS} FROM outbox_dead_letters
            WHERE $1 OR NOT resolved
            ORDER BY failed_at DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(include_resolved)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }

    async fn resolve_dead_letter(
        &self,
        id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<DeadLetterRecord> {
        let sql = format!(
            r#"
            UPDATE outbox_dead_letters
            SET resolved = TRUE, resolved_at = $2, resolution_note = $3
            WHERE id = $1
            RETURNING {DEAD_LETTER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .bind(note)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OutboxError::DeadLetterNotFound(id))?;

        Self::row_to_dead_letter(row)
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OutboxError, Result};

/// Unique identifier for an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random record id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Waiting to be claimed by a publisher.
    Pending,
    /// Claimed by a publisher; not visible to other claimers.
    Processing,
    /// Accepted by the broker.
    Published,
    /// Last publish attempt failed.
    Failed,
}

impl OutboxStatus {
    /// Column value used by the SQL store.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::UnknownStatus(other.to_string())),
        }
    }
}

/// An intent to publish one domain event.
///
/// Written in the same transaction as the state change it reports, then
/// driven through `PENDING -> PROCESSING -> PUBLISHED | FAILED` by the relay.
/// Failed records go back to `PENDING` after their backoff or are moved to the
/// dead-letter store once retries are exhausted. Claims that outlive the
/// processing timeout are reverted to `PENDING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    /// Aggregate family, also used to pick the topic (e.g. "order").
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Event name (e.g. "OrderCreated").
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// When the record was last claimed.
    pub processed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    /// Creates a pending record with a raw JSON payload.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
            published_at: None,
            last_failed_at: None,
            last_error: None,
        }
    }

    /// Creates a pending record by serializing `event`.
    pub fn from_event<E: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        event: &E,
    ) -> Result<Self> {
        Ok(Self::new(
            aggregate_type,
            aggregate_id,
            event_type,
            serde_json::to_value(event)?,
        ))
    }

    fn transition(&mut self, expected: OutboxStatus, to: OutboxStatus) -> Result<()> {
        if self.status != expected {
            return Err(OutboxError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Claims the record for publishing.
    pub fn mark_processing(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(OutboxStatus::Pending, OutboxStatus::Processing)?;
        self.processed_at = Some(at);
        Ok(())
    }

    /// Records a successful publish.
    pub fn mark_published(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(OutboxStatus::Processing, OutboxStatus::Published)?;
        self.published_at = Some(at);
        Ok(())
    }

    /// Records a failed publish attempt.
    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.transition(OutboxStatus::Processing, OutboxStatus::Failed)?;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.last_failed_at = Some(at);
        Ok(())
    }

    /// Returns a failed record to the pending queue.
    pub fn mark_for_retry(&mut self) -> Result<()> {
        self.transition(OutboxStatus::Failed, OutboxStatus::Pending)
    }

    /// Releases a claim whose publisher never finished.
    pub fn mark_timed_out(&mut self) -> Result<()> {
        self.transition(OutboxStatus::Processing, OutboxStatus::Pending)?;
        self.processed_at = None;
        Ok(())
    }

    /// Earliest instant a failed record may be retried.
    ///
    /// The wait is `2^retry_count` backoff units after the last failure. A
    /// record with no failure timestamp is retryable immediately.
    pub fn next_retry_at(&self, backoff_unit: Duration) -> Option<DateTime<Utc>> {
        let failed_at = self.last_failed_at?;
        let factor = 1i32 << self.retry_count.min(30);
        let wait = backoff_unit.checked_mul(factor).unwrap_or(Duration::MAX);
        Some(
            failed_at
                .checked_add_signed(wait)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Whether the backoff since the last failure has elapsed at `now`.
    pub fn is_due_for_retry(&self, now: DateTime<Utc>, backoff_unit: Duration) -> bool {
        self.next_retry_at(backoff_unit).is_none_or(|due| now >= due)
    }
}

/// Snapshot of an outbox record that exhausted its retries.
///
/// Only the resolution fields change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub original_id: OutboxId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub original_created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}

impl DeadLetterRecord {
    /// Copies an exhausted record verbatim.
    pub fn from_exhausted(record: &OutboxRecord, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_id: record.id,
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            retry_count: record.retry_count,
            last_error: record.last_error.clone(),
            original_created_at: record.created_at,
            failed_at,
            resolved: false,
            resolved_at: None,
            resolution_note: None,
        }
    }

    /// Marks the dead letter as handled by an operator.
    pub fn resolve(&mut self, note: impl Into<String>, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolution_note = Some(note.into());
    }
}

/// Record counts per status, plus the dead-letter backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub unresolved_dead_letters: u64,
}

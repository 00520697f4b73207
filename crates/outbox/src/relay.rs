//! Moves outbox records to the broker and keeps the table healthy.
//!
//! Four jobs run on independent timers: publish (claim + append), retry
//! (dead-letter exhausted records, then re-queue those whose backoff elapsed),
//! stuck-claim recovery, and retention cleanup. Each job is also callable
//! directly so tests and operators can drive it deterministically.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::publisher::{EventPublisher, resolve_topic};
use crate::store::OutboxStore;
use crate::{OutboxConfig, Result};

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Outcome of one publish tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub dead_lettered: usize,
    pub requeued: usize,
    pub still_backing_off: usize,
    /// Due records another relay moved on before this one got to them.
    pub skipped: usize,
}

/// Drives outbox records from `PENDING` to the broker.
#[derive(Clone)]
pub struct OutboxRelay<S, P> {
    store: S,
    publisher: P,
    config: OutboxConfig,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore + Clone + 'static,
    P: EventPublisher + Clone + 'static,
{
    /// Creates a relay over `store` publishing to `publisher`.
    pub fn new(store: S, publisher: P, config: OutboxConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Returns the relay configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Claims one batch and publishes it.
    ///
    /// A record whose publish fails is marked `FAILED`; one whose status
    /// update fails stays claimed and is picked up again after the
    /// processing timeout, so the broker may see it twice.
    #[tracing::instrument(skip(self))]
    pub async fn publish_pending(&self) -> Result<PublishReport> {
        let claimed = self
            .store
            .claim_batch(self.config.batch_size, Utc::now())
            .await?;
        let mut report = PublishReport {
            claimed: claimed.len(),
            ..PublishReport::default()
        };

        for record in claimed {
            let topic = resolve_topic(&record.aggregate_type);
            match self.publisher.append(topic, &record).await {
                Ok(entry_id) => {
                    if let Err(e) = self.store.mark_published(record.id, Utc::now()).await {
                        tracing::warn!(id = %record.id, error = %e, "published but status not updated");
                        continue;
                    }
                    metrics::counter!("outbox_published_total", "topic" => topic).increment(1);
                    tracing::debug!(id = %record.id, topic, entry_id, "outbox record published");
                    report.published += 1;
                }
                Err(publish_err) => {
                    metrics::counter!("outbox_publish_failures_total", "topic" => topic)
                        .increment(1);
                    tracing::warn!(
                        id = %record.id,
                        topic,
                        retry_count = record.retry_count + 1,
                        error = %publish_err,
                        "outbox publish failed"
                    );
                    if let Err(e) = self
                        .store
                        .mark_failed(record.id, &publish_err.to_string(), Utc::now())
                        .await
                    {
                        tracing::warn!(id = %record.id, error = %e, "failed to record publish failure");
                        continue;
                    }
                    report.failed += 1;
                }
            }
        }

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                "outbox batch processed"
            );
        }
        Ok(report)
    }

    /// Dead-letters exhausted records, then re-queues records whose
    /// backoff has elapsed at `now`.
    #[tracing::instrument(skip(self))]
    pub async fn retry_failed(&self, now: DateTime<Utc>) -> Result<RetryReport> {
        let mut report = RetryReport::default();

        let moved = self
            .store
            .move_exhausted_to_dead_letter(
                self.config.max_retry,
                self.config.dead_letter_batch,
                now,
            )
            .await?;
        for dead in &moved {
            metrics::counter!("outbox_dead_lettered_total").increment(1);
            tracing::error!(
                original_id = %dead.original_id,
                event_type = %dead.event_type,
                aggregate_id = %dead.aggregate_id,
                retry_count = dead.retry_count,
                last_error = dead.last_error.as_deref().unwrap_or(""),
                "outbox record moved to dead letter"
            );
        }
        report.dead_lettered = moved.len();

        let unit = chrono_duration(self.config.backoff_unit);
        let candidates = self
            .store
            .find_failed_for_retry(self.config.max_retry, self.config.retry_batch)
            .await?;
        for record in candidates {
            if !record.is_due_for_retry(now, unit) {
                report.still_backing_off += 1;
                continue;
            }
            if let Err(e) = self.store.mark_for_retry(record.id).await {
                tracing::warn!(id = %record.id, error = %e, "outbox record not re-queued");
                report.skipped += 1;
                continue;
            }
            tracing::info!(id = %record.id, retry_count = record.retry_count, "outbox record re-queued");
            report.requeued += 1;
        }

        Ok(report)
    }

    /// Reverts claims older than the processing timeout.
    #[tracing::instrument(skip(self))]
    pub async fn recover_timed_out(&self, now: DateTime<Utc>) -> Result<u64> {
        let threshold = now - chrono_duration(self.config.processing_timeout);
        let recovered = self
            .store
            .recover_timed_out(threshold, self.config.timeout_batch)
            .await?;
        if recovered > 0 {
            metrics::counter!("outbox_recovered_total").increment(recovered);
            tracing::warn!(recovered, "reverted abandoned outbox claims");
        }
        Ok(recovered)
    }

    /// Deletes published records older than the retention window.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
        let threshold = now - chrono_duration(self.config.retention);
        let deleted = self.store.delete_published_before(threshold).await?;
        if deleted > 0 {
            tracing::info!(deleted, "published outbox records cleaned up");
        }
        Ok(deleted)
    }

    /// Starts the four jobs on their timers.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();

        let relay = self.clone();
        let publish = spawn_job(
            "publish",
            config.publish_interval,
            shutdown_rx.clone(),
            move || {
                let relay = relay.clone();
                async move { relay.publish_pending().await.map(|_| ()) }
            },
        );

        let relay = self.clone();
        let retry = spawn_job(
            "retry",
            config.retry_interval,
            shutdown_rx.clone(),
            move || {
                let relay = relay.clone();
                async move { relay.retry_failed(Utc::now()).await.map(|_| ()) }
            },
        );

        let relay = self.clone();
        let recovery = spawn_job(
            "recovery",
            config.recovery_interval,
            shutdown_rx.clone(),
            move || {
                let relay = relay.clone();
                async move { relay.recover_timed_out(Utc::now()).await.map(|_| ()) }
            },
        );

        let relay = self;
        let cleanup = spawn_job(
            "cleanup",
            config.cleanup_interval,
            shutdown_rx,
            move || {
                let relay = relay.clone();
                async move { relay.cleanup(Utc::now()).await.map(|_| ()) }
            },
        );

        tracing::info!(
            publish_every = ?config.publish_interval,
            retry_every = ?config.retry_interval,
            "outbox relay started"
        );

        RelayHandle {
            shutdown: shutdown_tx,
            jobs: vec![publish, retry, recovery, cleanup],
        }
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = tick().await {
                        tracing::error!(job = name, error = %e, "outbox job failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(job = name, "outbox job stopped");
    })
}

/// Handle to the relay's background jobs.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    jobs: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Signals every job to stop and waits for them to finish their
    /// current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for job in self.jobs {
            if let Err(e) = job.await {
                tracing::warn!(error = %e, "outbox job panicked");
            }
        }
        tracing::info!("outbox relay stopped");
    }
}

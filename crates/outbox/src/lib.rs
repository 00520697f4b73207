//! Transactional outbox.
//!
//! Producers write an [`OutboxRecord`] in the same transaction as the state
//! change it reports. An [`OutboxRelay`] later claims pending records,
//! appends them to an [`EventPublisher`], retries failures with exponential
//! backoff and moves exhausted records to a dead-letter store. Delivery is
//! at-least-once.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod record;
pub mod relay;
pub mod store;

pub use config::OutboxConfig;
pub use error::{OutboxError, Result};
pub use memory::{InMemoryOutboxStore, OutboxTx};
pub use postgres::PostgresOutboxStore;
pub use publisher::{EventPublisher, InMemoryStreamBroker, StreamEntry, resolve_topic};
pub use record::{DeadLetterRecord, OutboxId, OutboxRecord, OutboxStats, OutboxStatus};
pub use relay::{OutboxRelay, PublishReport, RelayHandle, RetryReport};
pub use store::OutboxStore;

//! Broker-facing side of the outbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{OutboxError, OutboxRecord, Result};

/// Maps an aggregate type to the stream it is published on.
pub fn resolve_topic(aggregate_type: &str) -> &'static str {
    match aggregate_type {
        "order" => "stream:order-events",
        "payment" => "stream:payment-events",
        "inventory" => "stream:inventory-events",
        _ => "stream:domain-events",
    }
}

/// Append-only event broker.
///
/// Delivery is at-least-once: the relay may append the same record again
/// after a crash or timeout, so consumers dedupe on the record id.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Appends `record` to `topic`, returning the broker-assigned entry id.
    ///
    /// Entry ids increase monotonically within a topic.
    async fn append(&self, topic: &str, record: &OutboxRecord) -> Result<u64>;
}

/// One entry on a broker stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub entry_id: u64,
    pub outbox_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: HashMap<String, Vec<StreamEntry>>,
    fail_on_append: bool,
}

/// In-memory stream broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStreamBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryStreamBroker {
    /// Creates a broker with no streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append fail until reset.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.lock().fail_on_append = fail;
    }

    /// Returns the entries appended to `topic`.
    pub fn entries(&self, topic: &str) -> Vec<StreamEntry> {
        self.lock().streams.get(topic).cloned().unwrap_or_default()
    }

    /// Returns the total number of entries across all topics.
    pub fn total_entries(&self) -> usize {
        self.lock().streams.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventPublisher for InMemoryStreamBroker {
    async fn append(&self, topic: &str, record: &OutboxRecord) -> Result<u64> {
        let mut state = self.lock();
        if state.fail_on_append {
            return Err(OutboxError::Publish {
                topic: topic.to_string(),
                message: "broker unavailable".to_string(),
            });
        }

        let stream = state.streams.entry(topic.to_string()).or_default();
        let entry_id = stream.last().map_or(1, |e| e.entry_id + 1);
        stream.push(StreamEntry {
            entry_id,
            outbox_id: record.id.to_string(),
            aggregate_type: record.aggregate_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
        });
        Ok(entry_id)
    }
}

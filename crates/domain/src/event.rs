//! Domain event trait shared by every service.

use outbox::OutboxRecord;
use serde::Serialize;

/// A fact recorded by a service alongside the state change that caused it.
///
/// Events are named in past tense and never published directly: they become
/// outbox records committed together with the aggregate write.
pub trait DomainEvent: Serialize + Send + Sync + Sized {
    /// Lowercase aggregate name, used by the relay to pick a topic.
    fn aggregate_type(&self) -> &'static str;

    /// Identifier of the aggregate the event belongs to.
    fn aggregate_id(&self) -> String;

    /// Event name (e.g. "StockReserved").
    fn event_type(&self) -> &'static str;

    /// Serializes the event into a pending outbox record.
    fn to_outbox(&self) -> outbox::Result<OutboxRecord> {
        OutboxRecord::from_event(
            self.aggregate_type(),
            self.aggregate_id(),
            self.event_type(),
            self,
        )
    }
}

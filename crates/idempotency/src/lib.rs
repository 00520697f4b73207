//! Idempotency guard for retried client requests.
//!
//! A request carries a client-chosen key. The first request with a key
//! claims it with a `PROCESSING` sentinel, runs, and stores its response
//! under the key; later requests with the same key get that response back
//! instead of running again.

pub mod error;
pub mod guard;
pub mod service;
pub mod store;

pub use error::{IdempotencyError, Result};
pub use guard::{IdempotencyConfig, Idempotent};
pub use service::{IdempotencyService, Lookup, PROCESSING};
pub use store::{IdempotencyStore, InMemoryIdempotencyStore};

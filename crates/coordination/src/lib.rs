//! Coordination primitives shared by every service instance.
//!
//! - [`LeaseMutex`]: exclusive, lease-based lock per resource key. Leases are
//!   renewed by a watchdog while held and expire on their own if the holder
//!   stops renewing.
//! - [`ConcurrencyLimiter`]: counting semaphore that caps concurrent calls into
//!   a rate-limited downstream, sized once through a [`SemaphoreRegistry`].

pub mod error;
pub mod mutex;
pub mod semaphore;

pub use error::{CoordinationError, Result};
pub use mutex::{DistributedMutex, LeaseConfig, LeaseGuard, LeaseMutex};
pub use semaphore::{ConcurrencyLimiter, LimiterConfig, SemaphoreRegistry};

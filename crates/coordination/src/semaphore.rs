//! Counting semaphore for rate-limited downstream calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{CoordinationError, Result};

/// Named semaphores shared by every instance.
///
/// A semaphore's size is fixed by whoever registers it first; later
/// registrations of the same key are no-ops.
#[derive(Debug, Clone, Default)]
pub struct SemaphoreRegistry {
    semaphores: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl SemaphoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` with `permits` if it does not exist yet.
    ///
    /// Returns true if this call created it.
    pub fn try_set_permits(&self, key: &str, permits: usize) -> bool {
        self.get_or_create(key, permits).1
    }

    fn get_or_create(&self, key: &str, permits: usize) -> (Arc<Semaphore>, bool) {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = semaphores.get(key) {
            return (Arc::clone(existing), false);
        }
        let semaphore = Arc::new(Semaphore::new(permits));
        semaphores.insert(key.to_string(), Arc::clone(&semaphore));
        (semaphore, true)
    }

    /// Closes every semaphore, failing pending and future waits.
    pub fn shutdown(&self) {
        let semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for semaphore in semaphores.values() {
            semaphore.close();
        }
    }
}

/// Limiter sizing.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Semaphore key in the registry.
    pub key: String,
    /// Maximum concurrent holders.
    pub permits: usize,
    /// How long a caller waits for a permit before being throttled.
    pub wait: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key: "semaphore:pg-gateway".to_string(),
            permits: 10,
            wait: Duration::from_secs(5),
        }
    }
}

/// Bounds concurrent calls into a downstream without serializing them.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    key: String,
    semaphore: Arc<Semaphore>,
    wait: Duration,
}

impl ConcurrencyLimiter {
    /// Binds to the registry's semaphore, creating it on first use.
    pub fn initialize(registry: &SemaphoreRegistry, config: &LimiterConfig) -> Self {
        let (semaphore, created) = registry.get_or_create(&config.key, config.permits);
        if created {
            tracing::info!(key = %config.key, permits = config.permits, "limiter initialized");
        }
        tracing::debug!(
            key = %config.key,
            available = semaphore.available_permits(),
            "limiter bound"
        );
        Self {
            key: config.key.clone(),
            semaphore,
            wait: config.wait,
        }
    }

    /// Waits up to the configured timeout for a permit.
    ///
    /// The permit is returned to the semaphore when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.wait, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(CoordinationError::LockInterrupted {
                key: self.key.clone(),
            }),
            Err(_elapsed) => {
                metrics::counter!("limiter_throttled_total").increment(1);
                tracing::warn!(key = %self.key, wait = ?self.wait, "permit wait timed out");
                Err(CoordinationError::Throttled {
                    key: self.key.clone(),
                    waited: self.wait,
                })
            }
        }
    }

    /// Runs `call` while holding a permit.
    pub async fn run<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(call.await)
    }

    /// Returns the number of currently free permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

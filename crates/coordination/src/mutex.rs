//! Lease-based distributed mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CoordinationError, Result};

/// Exclusive lock keyed by resource, valid across process boundaries.
///
/// The returned guard releases the lock when dropped, so callers get release
/// on every exit path by holding the guard for the critical section.
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Scoped handle on an acquired lock.
    type Guard: Send;

    /// Blocks up to `wait` for an exclusive lease on `key`.
    async fn acquire(&self, key: &str, wait: Duration) -> Result<Self::Guard>;
}

/// Lease timing.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// How long a lease lives without renewal.
    pub lease_timeout: Duration,
    /// How often the watchdog renews a held lease.
    pub renew_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::with_lease_timeout(Duration::from_secs(30))
    }
}

impl LeaseConfig {
    /// Lease of the given length, renewed every third of it.
    pub fn with_lease_timeout(lease_timeout: Duration) -> Self {
        Self {
            lease_timeout,
            renew_interval: lease_timeout / 3,
        }
    }
}

#[derive(Debug)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

#[derive(Debug)]
struct Inner {
    config: LeaseConfig,
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
    closed: AtomicBool,
}

impl Inner {
    /// Takes the lease if free or expired; otherwise returns the current expiry.
    fn try_take(&self, key: &str, lease: Duration) -> std::result::Result<Uuid, Instant> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        if let Some(current) = leases.get(key)
            && current.expires_at > now
        {
            return Err(current.expires_at);
        }

        if leases.contains_key(key) {
            tracing::warn!(key, "taking over expired lease");
        }

        let token = Uuid::new_v4();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: now + lease,
            },
        );
        Ok(token)
    }

    fn renew(&self, key: &str, token: Uuid) -> bool {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        match leases.get_mut(key) {
            Some(current) if current.token == token => {
                current.expires_at = Instant::now() + self.config.lease_timeout;
                true
            }
            _ => false,
        }
    }

    fn release(&self, key: &str, token: Uuid) -> bool {
        let removed = {
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
            match leases.get(key) {
                Some(current) if current.token == token => {
                    leases.remove(key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.released.notify_waiters();
        }
        removed
    }
}

/// In-process model of a shared lease service.
///
/// Clones share the same lease table, so every service handed a clone
/// coordinates through it exactly as separate processes would through an
/// external lock server.
#[derive(Debug, Clone)]
pub struct LeaseMutex {
    inner: Arc<Inner>,
}

impl Default for LeaseMutex {
    fn default() -> Self {
        Self::new(LeaseConfig::default())
    }
}

impl LeaseMutex {
    /// Creates an empty lease table.
    pub fn new(config: LeaseConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                leases: Mutex::new(HashMap::new()),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquires a lease that a watchdog keeps alive until the guard is dropped.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn acquire_renewing(&self, key: &str, wait: Duration) -> Result<LeaseGuard> {
        let token = self
            .wait_for_lease(key, wait, self.inner.config.lease_timeout)
            .await?;
        let watchdog = self.spawn_watchdog(key.to_string(), token);
        tracing::debug!(key, "lease acquired");
        Ok(LeaseGuard {
            key: key.to_string(),
            token,
            inner: Arc::clone(&self.inner),
            watchdog: Some(watchdog),
            released: false,
        })
    }

    /// Acquires a fixed-length lease with no renewal.
    ///
    /// The lease lapses after `lease` even if the guard is still alive.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn acquire_with_lease(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LeaseGuard> {
        let token = self.wait_for_lease(key, wait, lease).await?;
        Ok(LeaseGuard {
            key: key.to_string(),
            token,
            inner: Arc::clone(&self.inner),
            watchdog: None,
            released: false,
        })
    }

    /// Returns true if a live lease is held on `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        let leases = self
            .inner
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }

    /// Interrupts every pending and future wait.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.released.notify_waiters();
    }

    async fn wait_for_lease(&self, key: &str, wait: Duration, lease: Duration) -> Result<Uuid> {
        let started = Instant::now();
        let deadline = started + wait;

        loop {
            // Register for wake-ups before checking, so a release between the
            // check and the await is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(CoordinationError::LockInterrupted {
                    key: key.to_string(),
                });
            }

            let expires_at = match self.inner.try_take(key, lease) {
                Ok(token) => return Ok(token),
                Err(expires_at) => expires_at,
            };

            if Instant::now() >= deadline {
                metrics::counter!("lock_acquisition_failures_total").increment(1);
                tracing::warn!(key, ?wait, "lock acquisition timed out");
                return Err(CoordinationError::LockAcquisitionFailed {
                    key: key.to_string(),
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline.min(expires_at)) => {}
            }
        }
    }

    fn spawn_watchdog(&self, key: String, token: Uuid) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.renew_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.renew(&key, token) {
                    tracing::warn!(key, "lease lost before renewal");
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl DistributedMutex for LeaseMutex {
    type Guard = LeaseGuard;

    async fn acquire(&self, key: &str, wait: Duration) -> Result<LeaseGuard> {
        self.acquire_renewing(key, wait).await
    }
}

/// A held lease. Dropping it stops renewal and releases the lock.
#[derive(Debug)]
pub struct LeaseGuard {
    key: String,
    token: Uuid,
    inner: Arc<Inner>,
    watchdog: Option<JoinHandle<()>>,
    released: bool,
}

impl LeaseGuard {
    /// Returns the locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lease now.
    ///
    /// Returns false if this guard no longer held it (already released, or
    /// expired and taken by someone else). Calling it twice is harmless.
    pub fn release(&mut self) -> bool {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if self.released {
            return false;
        }
        self.released = true;
        let released = self.inner.release(&self.key, self.token);
        if released {
            tracing::debug!(key = %self.key, "lease released");
        }
        released
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}

//! Decorator that runs an operation at most once per client key.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::service::{IdempotencyService, Lookup};
use crate::store::IdempotencyStore;
use crate::IdempotencyError;

/// Per-operation idempotency policy.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Request header carrying the client key.
    pub header_name: String,
    /// Lifetime of both the in-flight sentinel and the cached response.
    pub ttl: Duration,
    /// Namespace prepended to client keys.
    pub prefix: String,
    /// Reject requests without a key instead of running them unguarded.
    pub required: bool,
    /// Delay between re-checks while another request holds the key.
    pub poll_interval: Duration,
    /// How long a duplicate waits for the first request's response.
    pub convergence_timeout: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Idempotency-Key".to_string(),
            ttl: Duration::from_secs(86_400),
            prefix: "idempotency".to_string(),
            required: true,
            poll_interval: Duration::from_millis(100),
            convergence_timeout: Duration::from_secs(5),
        }
    }
}

impl IdempotencyConfig {
    /// Same policy, but requests without a key bypass the cache.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Wraps operations so a repeated client key replays the first response.
///
/// Only successful responses are cached. A failed operation releases its
/// claim, so a later retry with the same key runs again.
#[derive(Debug, Clone)]
pub struct Idempotent<S> {
    service: IdempotencyService<S>,
    config: IdempotencyConfig,
}

impl<S: IdempotencyStore> Idempotent<S> {
    pub fn new(store: S, config: IdempotencyConfig) -> Self {
        Self {
            service: IdempotencyService::new(store, config.prefix.clone()),
            config,
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Header the client key is read from.
    pub fn header_name(&self) -> &str {
        &self.config.header_name
    }

    /// Runs `operation` unless `client_key` already has a response.
    ///
    /// A duplicate that arrives while the first request is running re-checks
    /// every `poll_interval` and replays the response once it appears. It
    /// never runs `operation` itself unless the first request failed and
    /// released the key. After `convergence_timeout` it gives up with
    /// [`IdempotencyError::RequestInFlight`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        client_key: Option<&str>,
        operation: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(client_key) = client_key.map(str::trim).filter(|k| !k.is_empty()) else {
            if self.config.required {
                return Err(IdempotencyError::KeyRequired {
                    header: self.config.header_name.clone(),
                }
                .into());
            }
            return operation().await;
        };

        let cache_key = self.service.build_key(client_key);
        let deadline = Instant::now() + self.config.convergence_timeout;
        loop {
            match self.service.lookup(&cache_key).await? {
                Lookup::Completed(value) => {
                    metrics::counter!("idempotency_replays_total").increment(1);
                    tracing::info!(key = %cache_key, "replaying cached response");
                    return Ok(serde_json::from_value(value).map_err(IdempotencyError::from)?);
                }
                Lookup::Absent => {
                    if self
                        .service
                        .mark_as_processing(&cache_key, self.config.ttl)
                        .await?
                    {
                        return self.run_claimed(&cache_key, operation).await;
                    }
                }
                Lookup::InFlight => {}
            }

            if Instant::now() >= deadline {
                tracing::warn!(key = %cache_key, "duplicate request gave up waiting");
                return Err(IdempotencyError::RequestInFlight {
                    key: client_key.to_string(),
                }
                .into());
            }
            tracing::debug!(key = %cache_key, "request in flight, waiting");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn run_claimed<T, E, F, Fut>(&self, cache_key: &str, operation: F) -> Result<T, E>
    where
        T: Serialize,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match operation().await {
            Ok(value) => {
                let encoded = serde_json::to_value(&value).map_err(IdempotencyError::from)?;
                if let Err(e) = self
                    .service
                    .save_response(cache_key, &encoded, self.config.ttl)
                    .await
                {
                    tracing::warn!(key = %cache_key, error = %e, "failed to cache response");
                    self.release_quietly(cache_key).await;
                }
                Ok(value)
            }
            Err(err) => {
                self.release_quietly(cache_key).await;
                Err(err)
            }
        }
    }

    async fn release_quietly(&self, cache_key: &str) {
        if let Err(e) = self.service.release(cache_key).await {
            tracing::warn!(key = %cache_key, error = %e, "failed to release idempotency key");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::InMemoryIdempotencyStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        order_id: String,
    }

    #[derive(Debug)]
    enum TestError {
        Guard(IdempotencyError),
        Business(&'static str),
    }

    impl From<IdempotencyError> for TestError {
        fn from(e: IdempotencyError) -> Self {
            TestError::Guard(e)
        }
    }

    fn guard(config: IdempotencyConfig) -> Idempotent<InMemoryIdempotencyStore> {
        Idempotent::new(InMemoryIdempotencyStore::new(), config)
    }

    async fn place_order(
        guard: &Idempotent<InMemoryIdempotencyStore>,
        key: Option<&str>,
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        outcome: Result<&str, &'static str>,
    ) -> Result<Receipt, TestError> {
        let calls = Arc::clone(calls);
        let outcome = outcome.map(str::to_string);
        guard
            .execute(key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                match outcome {
                    Ok(order_id) => Ok(Receipt { order_id }),
                    Err(reason) => Err(TestError::Business(reason)),
                }
            })
            .await
    }

    #[tokio::test]
    async fn test_missing_key_rejected_when_required() {
        let guard = guard(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result = place_order(&guard, None, &calls, Duration::ZERO, Ok("o-1")).await;

        match result {
            Err(TestError::Guard(e)) => assert_eq!(e.code(), "KEY_REQUIRED"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_key_counts_as_missing() {
        let guard = guard(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result = place_order(&guard, Some("   "), &calls, Duration::ZERO, Ok("o-1")).await;

        assert!(matches!(
            result,
            Err(TestError::Guard(IdempotencyError::KeyRequired { .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_bypasses_cache_when_optional() {
        let guard = guard(IdempotencyConfig::default().optional());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            place_order(&guard, None, &calls, Duration::ZERO, Ok("o-1"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_key_replays_response() {
        let guard = guard(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Ok("o-1"))
            .await
            .unwrap();
        let second = place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Ok("o-2"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.order_id, "o-1");
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let guard = guard(IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Err("declined")).await;
        assert!(matches!(first, Err(TestError::Business("declined"))));

        let second = place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Ok("o-2"))
            .await
            .unwrap();
        assert_eq!(second.order_id, "o-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicates_execute_once() {
        let guard = Arc::new(guard(IdempotencyConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let guard = Arc::clone(&guard);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let order_id = format!("o-{i}");
                place_order(
                    &guard,
                    Some("key-1"),
                    &calls,
                    Duration::from_millis(350),
                    Ok(&order_id),
                )
                .await
                .unwrap()
            }));
        }

        let mut receipts = Vec::new();
        for handle in handles {
            receipts.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(receipts.iter().all(|r| r == &receipts[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_gives_up_after_convergence_timeout() {
        let config = IdempotencyConfig {
            convergence_timeout: Duration::from_millis(300),
            ..IdempotencyConfig::default()
        };
        let guard = Arc::new(guard(config));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = {
            let guard = Arc::clone(&guard);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                place_order(&guard, Some("key-1"), &calls, Duration::from_secs(2), Ok("o-1")).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let duplicate =
            place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Ok("o-2")).await;
        assert!(matches!(
            duplicate,
            Err(TestError::Guard(IdempotencyError::RequestInFlight { .. }))
        ));

        assert!(slow.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_takes_over_after_first_request_fails() {
        let guard = Arc::new(guard(IdempotencyConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let guard = Arc::clone(&guard);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                place_order(
                    &guard,
                    Some("key-1"),
                    &calls,
                    Duration::from_millis(150),
                    Err("gateway down"),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let retried = place_order(&guard, Some("key-1"), &calls, Duration::ZERO, Ok("o-2"))
            .await
            .unwrap();

        assert!(failing.await.unwrap().is_err());
        assert_eq!(retried.order_id, "o-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

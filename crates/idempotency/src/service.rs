use std::time::Duration;

use crate::{Result, store::IdempotencyStore};

/// Value held for a key whose first request has not finished.
pub const PROCESSING: &str = "PROCESSING";

/// State of a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// No request has claimed the key, or its claim expired.
    Absent,
    /// A request holds the key and has not produced a response yet.
    InFlight,
    /// The terminal response of the first successful request.
    Completed(serde_json::Value),
}

/// Low-level operations on the response cache.
#[derive(Debug, Clone)]
pub struct IdempotencyService<S> {
    store: S,
    prefix: String,
}

impl<S: IdempotencyStore> IdempotencyService<S> {
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Namespaces a client key: `prefix:key`.
    pub fn build_key(&self, client_key: &str) -> String {
        format!("{}:{}", self.prefix, client_key)
    }

    pub async fn lookup(&self, cache_key: &str) -> Result<Lookup> {
        match self.store.get(cache_key).await? {
            None => Ok(Lookup::Absent),
            Some(value) if value == PROCESSING => Ok(Lookup::InFlight),
            Some(value) => Ok(Lookup::Completed(serde_json::from_str(&value)?)),
        }
    }

    /// Cached terminal response, if any. The in-flight sentinel is not one.
    pub async fn get_if_processed(&self, cache_key: &str) -> Result<Option<serde_json::Value>> {
        match self.lookup(cache_key).await? {
            Lookup::Completed(value) => Ok(Some(value)),
            Lookup::Absent | Lookup::InFlight => Ok(None),
        }
    }

    /// Atomically claims `cache_key`. False means another request holds it.
    pub async fn mark_as_processing(&self, cache_key: &str, ttl: Duration) -> Result<bool> {
        self.store.set_if_absent(cache_key, PROCESSING, ttl).await
    }

    /// Replaces the sentinel with the terminal response.
    pub async fn save_response(
        &self,
        cache_key: &str,
        response: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let encoded = serde_json::to_string(response)?;
        self.store.set(cache_key, &encoded, ttl).await
    }

    /// Drops a claim so a later request may run the operation.
    pub async fn release(&self, cache_key: &str) -> Result<()> {
        self.store.remove(cache_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryIdempotencyStore;

    fn service() -> IdempotencyService<InMemoryIdempotencyStore> {
        IdempotencyService::new(InMemoryIdempotencyStore::new(), "idempotency")
    }

    #[test]
    fn test_build_key() {
        assert_eq!(service().build_key("abc-123"), "idempotency:abc-123");
    }

    #[tokio::test]
    async fn test_sentinel_is_not_a_response() {
        let service = service();
        let key = service.build_key("k");
        assert!(
            service
                .mark_as_processing(&key, Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(service.lookup(&key).await.unwrap(), Lookup::InFlight);
        assert!(service.get_if_processed(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_response_is_returned() {
        let service = service();
        let key = service.build_key("k");
        let ttl = Duration::from_secs(60);
        service.mark_as_processing(&key, ttl).await.unwrap();
        service
            .save_response(&key, &serde_json::json!({"order_id": "o-1"}), ttl)
            .await
            .unwrap();

        let cached = service.get_if_processed(&key).await.unwrap().unwrap();
        assert_eq!(cached["order_id"], "o-1");
        assert!(!service.mark_as_processing(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_allows_new_claim() {
        let service = service();
        let key = service.build_key("k");
        let ttl = Duration::from_secs(60);
        service.mark_as_processing(&key, ttl).await.unwrap();
        service.release(&key).await.unwrap();
        assert_eq!(service.lookup(&key).await.unwrap(), Lookup::Absent);
        assert!(service.mark_as_processing(&key, ttl).await.unwrap());
    }
}

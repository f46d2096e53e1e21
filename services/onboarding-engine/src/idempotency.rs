//! `Idempotency-Key` handling for partner writes
//!
//! The first request with a key runs and its response body is stored; repeats
//! within the TTL get the stored body back. A repeat arriving while the first
//! is still running is rejected instead of running twice.

use crate::errors::{OnboardingError, Result};
use message_bus::IdempotencyStore;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const MAX_KEY_LEN: usize = 255;

#[derive(Clone)]
pub struct IdempotentRequests {
    store: Arc<dyn IdempotencyStore>,
    lock_ttl: Duration,
    response_ttl: Duration,
}

impl IdempotentRequests {
    pub fn new(store: Arc<dyn IdempotencyStore>, lock_ttl: Duration, response_ttl: Duration) -> Self {
        Self {
            store,
            lock_ttl,
            response_ttl,
        }
    }

    fn keys(scope: Uuid, operation: &str, key: &str) -> (String, String) {
        let base = format!("kyc:http:{}:{}:{}", scope, operation, key);
        (format!("{}:lock", base), format!("{}:response", base))
    }

    /// Run `op` once per `(scope, operation, key)`
    pub async fn run<T, F, Fut>(&self, scope: Uuid, operation: &str, key: Option<&str>, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return op().await;
        };
        if key.len() > MAX_KEY_LEN {
            return Err(OnboardingError::Validation(format!(
                "{} must be at most {} characters",
                IDEMPOTENCY_HEADER, MAX_KEY_LEN
            )));
        }

        let (lock_key, response_key) = Self::keys(scope, operation, key);

        if let Some(stored) = self.store.get(&response_key).await? {
            debug!("Replaying stored response for idempotency key {}", key);
            return Ok(serde_json::from_str(&stored)?);
        }

        let token = Uuid::new_v4().to_string();
        if !self.store.try_acquire(&lock_key, &token, self.lock_ttl).await? {
            return Err(OnboardingError::IdempotencyInFlight);
        }

        let result = op().await;

        if let Ok(value) = &result {
            match serde_json::to_string(value) {
                Ok(body) => {
                    if let Err(e) = self.store.put(&response_key, &body, self.response_ttl).await {
                        warn!("Failed to store idempotent response for {}: {}", key, e);
                    }
                }
                Err(e) => warn!("Failed to serialize idempotent response for {}: {}", key, e),
            }
        }

        if let Err(e) = self.store.release(&lock_key, &token).await {
            warn!("Failed to release idempotency lock for {}: {}", key, e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn requests() -> IdempotentRequests {
        IdempotentRequests::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_replays_stored_response() {
        let requests = requests();
        let calls = AtomicUsize::new(0);
        let tenant = Uuid::new_v4();

        for _ in 0..3 {
            let value: u32 = requests
                .run(tenant, "create_case", Some("abc"), || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32 + 100)
                })
                .await
                .unwrap();
            assert_eq!(value, 100);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_tenant() {
        let requests = requests();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: u32 = requests
                .run(Uuid::new_v4(), "create_case", Some("same"), || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_stored() {
        let requests = requests();
        let tenant = Uuid::new_v4();

        let first: Result<u32> = requests
            .run(tenant, "create_case", Some("k"), || async {
                Err(OnboardingError::Validation("bad".into()))
            })
            .await;
        assert!(first.is_err());

        let second: u32 = requests
            .run(tenant, "create_case", Some("k"), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_rejected() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let requests = IdempotentRequests::new(store.clone(), Duration::from_secs(60), Duration::from_secs(3600));
        let tenant = Uuid::new_v4();
        let (lock_key, _) = IdempotentRequests::keys(tenant, "create_case", "busy");
        assert!(store.try_acquire(&lock_key, "other", Duration::from_secs(60)).await.unwrap());

        let result: Result<u32> = requests
            .run(tenant, "create_case", Some("busy"), || async { Ok(1) })
            .await;
        assert!(matches!(result, Err(OnboardingError::IdempotencyInFlight)));
    }

    #[tokio::test]
    async fn test_no_key_always_runs() {
        let requests = requests();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: () = requests
                .run(Uuid::new_v4(), "create_case", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Minimum-interval limiter shared across clients and processes.
//!
//! The last request time lives both in memory and in a [`KeyValueStore`];
//! the later of the two wins, so separate instances pointed at the same
//! store honour one limit.

use crate::clock::Clock;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct RateLimiter {
    min_interval: Duration,
    storage_key: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    last_request_ms: Mutex<i64>,
}

/// Held while a request is in flight; dropping it lets the next caller in.
pub struct RateLimitPermit<'a> {
    _guard: MutexGuard<'a, i64>,
    granted_at: DateTime<Utc>,
}

impl RateLimitPermit<'_> {
    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }

    pub fn release(self) {}
}

impl RateLimiter {
    pub fn new(
        min_interval: Duration,
        storage_key: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            min_interval,
            storage_key: storage_key.into(),
            store,
            clock,
            last_request_ms: Mutex::new(0),
        }
    }

    fn stored_last(&self) -> Option<i64> {
        self.store.get(&self.storage_key)?.trim().parse().ok()
    }

    fn wait_after(&self, last_ms: i64) -> Duration {
        let last = last_ms.max(self.stored_last().unwrap_or(0));
        let elapsed = self.clock.millis_since_epoch().saturating_sub(last);
        let interval = i64::try_from(self.min_interval.as_millis()).unwrap_or(i64::MAX);
        if elapsed >= interval {
            Duration::ZERO
        } else {
            Duration::from_millis((interval - elapsed.max(0)) as u64)
        }
    }

    /// How long a request made now would have to wait.
    pub async fn wait_time(&self) -> Duration {
        let last = *self.last_request_ms.lock().await;
        self.wait_after(last)
    }

    /// Wait out the interval, record the request time, and hand out a permit.
    pub async fn acquire(&self) -> RateLimitPermit<'_> {
        let mut guard = self.last_request_ms.lock().await;

        let wait = self.wait_after(*guard);
        if !wait.is_zero() {
            debug!(
                key = %self.storage_key,
                wait_ms = wait.as_millis() as u64,
                "rate limited, waiting"
            );
            tokio::time::sleep(wait).await;
        }

        let granted_at = self.clock.now();
        *guard = granted_at.timestamp_millis();
        if let Err(e) = self.store.set(&self.storage_key, &(*guard).to_string()) {
            warn!(key = %self.storage_key, error = %e, "failed to store rate limit timestamp");
        }

        RateLimitPermit {
            _guard: guard,
            granted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn limiter(store: &Arc<MemoryStore>, clock: &MockClock) -> RateLimiter {
        RateLimiter::new(
            Duration::from_millis(700),
            "anime-calendar:anilist-last-request",
            store.clone(),
            Arc::new(clock.clone()),
        )
    }

    fn clock() -> MockClock {
        MockClock::at(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_first_request_is_immediate_and_recorded() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let limiter = limiter(&store, &clock);

        assert_eq!(limiter.wait_time().await, Duration::ZERO);
        let permit = limiter.acquire().await;
        assert_eq!(permit.granted_at(), clock.now());
        permit.release();

        assert_eq!(
            store.get("anime-calendar:anilist-last-request"),
            Some(clock.millis_since_epoch().to_string())
        );
        assert_eq!(limiter.wait_time().await, Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_limit_is_shared_through_store() {
        let store = Arc::new(MemoryStore::new());
        let clock = clock();
        let first = limiter(&store, &clock);
        let second = limiter(&store, &clock);

        first.acquire().await.release();
        clock.advance(chrono::Duration::milliseconds(200));
        assert_eq!(second.wait_time().await, Duration::from_millis(500));

        clock.advance(chrono::Duration::milliseconds(500));
        assert_eq!(second.wait_time().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_garbage_in_store_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set("anime-calendar:anilist-last-request", "not-a-number").unwrap();
        let limiter = limiter(&store, &clock());
        assert_eq!(limiter.wait_time().await, Duration::ZERO);
    }
}

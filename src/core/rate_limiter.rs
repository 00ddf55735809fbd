//! Sliding-window ingestion rate limiter.
//!
//! Each subject gets a sorted set of request timestamps. A request is allowed
//! while fewer than `max_requests` timestamps fall inside the trailing window.
//! The limiter fails open: if the backend is unreachable, ingestion proceeds
//! unthrottled.

use crate::backend::KvBackend;
use crate::clock::SharedClock;
use crate::error::BackendError;
use chrono::Duration;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Default limiter key prefix for device ingestion.
pub const INGEST_LIMITER_PREFIX: &str = "sensor_ingest";

/// Default maximum requests per window.
pub const DEFAULT_MAX_REQUESTS: usize = 120;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: i64 = 60;

pub struct RateLimiter {
    backend: Arc<dyn KvBackend>,
    clock: SharedClock,
    prefix: String,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        clock: SharedClock,
        prefix: impl Into<String>,
        max_requests: usize,
        window: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            prefix: prefix.into(),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.prefix, subject_id)
    }

    /// Whether `subject_id` may make another request now. Records the request
    /// when allowed.
    pub async fn is_allowed(&self, subject_id: &str) -> bool {
        match self.check_and_record(subject_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(subject = subject_id, "Rate limiter error, failing open: {}", e);
                true
            }
        }
    }

    async fn check_and_record(&self, subject_id: &str) -> Result<bool, BackendError> {
        let key = self.key(subject_id);
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window_start = now_ms - self.window.num_milliseconds();

        self.backend.sorted_remove_below(&key, window_start).await?;
        if self.backend.sorted_len(&key).await? >= self.max_requests {
            return Ok(false);
        }

        // Members must stay unique when several requests share a millisecond.
        let member = format!("{now_ms}-{}", Uuid::new_v4());
        self.backend.sorted_add(&key, now_ms, member).await?;
        self.backend.expire(&key, self.window).await?;
        Ok(true)
    }

    /// Requests left in the current window. Reports the full allowance when
    /// the backend is unreachable.
    pub async fn remaining(&self, subject_id: &str) -> usize {
        let key = self.key(subject_id);
        let window_start = self.clock.now().timestamp_millis() - self.window.num_milliseconds();

        let count = async {
            self.backend.sorted_remove_below(&key, window_start).await?;
            self.backend.sorted_len(&key).await
        };
        match count.await {
            Ok(count) => self.max_requests.saturating_sub(count),
            Err(e) => {
                warn!(subject = subject_id, "Rate limiter error: {}", e);
                self.max_requests
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::UnreachableKv;
    use crate::backend::MemoryKv;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn setup(max: usize, window_secs: i64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryKv::new(clock.clone()));
        let limiter = RateLimiter::new(
            backend,
            clock.clone(),
            INGEST_LIMITER_PREFIX,
            max,
            Duration::seconds(window_secs),
        );
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_exact_allowance_then_reject() {
        let (_, limiter) = setup(120, 60);
        for _ in 0..120 {
            assert!(limiter.is_allowed("a").await);
        }
        assert!(!limiter.is_allowed("a").await);
        assert_eq!(limiter.remaining("a").await, 0);
    }

    #[tokio::test]
    async fn test_permits_again_after_earliest_ages_out() {
        let (clock, limiter) = setup(3, 60);
        assert!(limiter.is_allowed("a").await);
        clock.advance(Duration::seconds(10));
        assert!(limiter.is_allowed("a").await);
        assert!(limiter.is_allowed("a").await);
        assert!(!limiter.is_allowed("a").await);

        // Earliest request is now 59s old: still inside the window.
        clock.advance(Duration::seconds(49));
        assert!(!limiter.is_allowed("a").await);

        clock.advance(Duration::seconds(2));
        assert!(limiter.is_allowed("a").await);
        assert!(!limiter.is_allowed("a").await);
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let (_, limiter) = setup(1, 60);
        assert!(limiter.is_allowed("a").await);
        assert!(!limiter.is_allowed("a").await);
        assert!(limiter.is_allowed("b").await);
        assert_eq!(limiter.remaining("c").await, 1);
    }

    #[tokio::test]
    async fn test_fails_open() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = RateLimiter::new(
            Arc::new(UnreachableKv),
            clock,
            INGEST_LIMITER_PREFIX,
            1,
            Duration::seconds(60),
        );
        for _ in 0..5 {
            assert!(limiter.is_allowed("a").await);
        }
        assert_eq!(limiter.remaining("a").await, 1);
    }
}

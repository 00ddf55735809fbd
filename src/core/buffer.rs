//! Per-subject rolling buffer of raw samples.
//!
//! Each subject's buffer is a newest-first list bounded by both a sample
//! count and an age. Writes refresh the buffer's expiry, so a subject whose
//! device goes quiet drops out of [`RollingBuffer::list_subjects`] once the
//! retention window passes. That is what "active subject" means to the
//! scheduler.

use crate::backend::KvBackend;
use crate::clock::SharedClock;
use crate::error::BackendError;
use crate::ingest::types::RawSample;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix for rolling buffers.
pub const BUFFER_KEY_PREFIX: &str = "sensor:";

/// Default capacity: 15 minutes at 1 Hz.
pub const DEFAULT_CAPACITY: usize = 900;

/// Default retention window in seconds.
pub const DEFAULT_RETENTION_SECS: i64 = 15 * 60;

/// Capacity- and age-bounded sample buffers, one per subject.
pub struct RollingBuffer {
    backend: Arc<dyn KvBackend>,
    clock: SharedClock,
    capacity: usize,
    retention: Duration,
}

impl RollingBuffer {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        clock: SharedClock,
        capacity: usize,
        retention: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            capacity: capacity.max(1),
            retention,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn key(subject_id: &str) -> String {
        format!("{BUFFER_KEY_PREFIX}{subject_id}")
    }

    /// An entry older than the retention window is gone, whether or not the
    /// backend has evicted it yet.
    fn is_expired(&self, sample: &RawSample, now: DateTime<Utc>) -> bool {
        now - sample.server_timestamp > self.retention
    }

    /// Insert `sample` at the head of its subject's buffer.
    ///
    /// This will:
    /// 1. Push the sample to the head
    /// 2. Trim the buffer to capacity
    /// 3. Drop aged entries from the tail
    /// 4. Reset the buffer's expiry to the retention window
    pub async fn append(&self, sample: &RawSample) -> Result<(), BackendError> {
        let key = Self::key(&sample.subject_id);
        let encoded = serde_json::to_string(sample).map_err(|e| BackendError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        self.backend.list_push_front(&key, encoded).await?;
        self.backend.list_trim(&key, 0, self.capacity - 1).await?;
        self.drop_aged_tail(&key).await?;
        self.backend.expire(&key, self.retention).await?;

        debug!(
            subject = %sample.subject_id,
            hr = sample.heart_rate,
            spo2 = sample.spo2,
            "Buffered sample"
        );
        Ok(())
    }

    /// Entries are newest-first, so aged entries always form a suffix.
    async fn drop_aged_tail(&self, key: &str) -> Result<(), BackendError> {
        let now = self.clock.now();
        let aged = |raw: &str| match decode(key, raw) {
            Ok(sample) => self.is_expired(&sample, now),
            // Undecodable entries are dropped with the aged ones.
            Err(_) => true,
        };
        let dropped = self.backend.list_drop_tail_while(key, &aged).await?;
        if dropped > 0 {
            debug!(key, dropped, "Dropped aged samples");
        }
        Ok(())
    }

    /// Up to `n` newest-first samples for `subject_id`. Does not mutate.
    pub async fn read_recent(
        &self,
        subject_id: &str,
        n: usize,
    ) -> Result<Vec<RawSample>, BackendError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = Self::key(subject_id);
        let now = self.clock.now();
        let raw = self.backend.list_range(&key, 0, n - 1).await?;

        let mut samples = Vec::with_capacity(raw.len());
        for item in &raw {
            match decode(&key, item) {
                Ok(sample) if !self.is_expired(&sample, now) => samples.push(sample),
                Ok(_) => break,
                Err(e) => warn!("Skipping malformed buffer entry: {}", e),
            }
        }
        Ok(samples)
    }

    /// The newest non-expired sample for `subject_id`, if any.
    pub async fn latest(&self, subject_id: &str) -> Result<Option<RawSample>, BackendError> {
        Ok(self.read_recent(subject_id, 1).await?.into_iter().next())
    }

    /// Every subject currently holding a non-expired buffer.
    pub async fn list_subjects(&self) -> Result<Vec<String>, BackendError> {
        let keys = self.backend.keys_with_prefix(BUFFER_KEY_PREFIX).await?;
        let mut subjects = Vec::with_capacity(keys.len());
        for key in keys {
            let subject_id = &key[BUFFER_KEY_PREFIX.len()..];
            if self.latest(subject_id).await?.is_some() {
                subjects.push(subject_id.to_string());
            }
        }
        Ok(subjects)
    }
}

fn decode(key: &str, raw: &str) -> Result<RawSample, BackendError> {
    serde_json::from_str(raw).map_err(|e| BackendError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKv;
    use crate::clock::{Clock, ManualClock};
    use crate::ingest::types::Vector3;
    use chrono::TimeZone;

    fn setup(capacity: usize, retention_secs: i64) -> (Arc<ManualClock>, RollingBuffer) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryKv::new(clock.clone()));
        let buffer = RollingBuffer::new(
            backend,
            clock.clone(),
            capacity,
            Duration::seconds(retention_secs),
        );
        (clock, buffer)
    }

    fn sample(subject: &str, hr: f64, at: DateTime<Utc>) -> RawSample {
        RawSample {
            subject_id: subject.to_string(),
            heart_rate: hr,
            spo2: 98.0,
            temperature_c: 36.6,
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::default(),
            device_timestamp: at,
            server_timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let (clock, buffer) = setup(10, 900);
        for i in 0..25 {
            buffer.append(&sample("a", 60.0 + i as f64, clock.now())).await.unwrap();
            clock.advance(Duration::seconds(1));
        }

        let all = buffer.read_recent("a", 100).await.unwrap();
        assert_eq!(all.len(), 10);
        // Newest first
        assert_eq!(all[0].heart_rate, 84.0);
        assert_eq!(all[9].heart_rate, 75.0);
        assert!(all
            .windows(2)
            .all(|pair| pair[0].server_timestamp >= pair[1].server_timestamp));
    }

    #[tokio::test]
    async fn test_retention_bound() {
        let (clock, buffer) = setup(900, 60);
        for _ in 0..120 {
            buffer.append(&sample("a", 70.0, clock.now())).await.unwrap();
            clock.advance(Duration::seconds(1));
        }

        let now = clock.now();
        let all = buffer.read_recent("a", 900).await.unwrap();
        assert!(!all.is_empty());
        assert!(all.len() <= 61);
        assert!(all
            .iter()
            .all(|s| now - s.server_timestamp <= Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_append_drops_only_aged_tail() {
        let (clock, buffer) = setup(900, 60);
        let start = clock.now();
        buffer.append(&sample("a", 60.0, start)).await.unwrap();
        clock.advance(Duration::seconds(30));
        buffer.append(&sample("a", 61.0, clock.now())).await.unwrap();
        clock.advance(Duration::seconds(31));

        // A late-arriving sample stamped inside the window stays behind the head.
        buffer
            .append(&sample("a", 62.0, start + Duration::seconds(45)))
            .await
            .unwrap();

        let key = RollingBuffer::key("a");
        assert_eq!(buffer.backend.list_len(&key).await.unwrap(), 2);
        let kept = buffer.read_recent("a", 10).await.unwrap();
        assert_eq!(kept.iter().map(|s| s.heart_rate).collect::<Vec<_>>(), vec![62.0, 61.0]);
    }

    #[tokio::test]
    async fn test_read_recent_limit() {
        let (clock, buffer) = setup(900, 900);
        for i in 0..5 {
            buffer.append(&sample("a", i as f64, clock.now())).await.unwrap();
        }
        let recent = buffer.read_recent("a", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].heart_rate, 4.0);
        assert!(buffer.read_recent("a", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_subject_leaves_listing() {
        let (clock, buffer) = setup(900, 900);
        buffer.append(&sample("idle", 70.0, clock.now())).await.unwrap();
        clock.advance(Duration::seconds(600));
        buffer.append(&sample("busy", 70.0, clock.now())).await.unwrap();

        let mut subjects = buffer.list_subjects().await.unwrap();
        subjects.sort();
        assert_eq!(subjects, vec!["busy", "idle"]);

        clock.advance(Duration::seconds(301));
        assert_eq!(buffer.list_subjects().await.unwrap(), vec!["busy"]);
        assert!(buffer.latest("idle").await.unwrap().is_none());
    }
}

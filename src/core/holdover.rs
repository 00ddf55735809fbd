//! Short-TTL holdover of the last good heart rate and SpO₂ per subject.
//!
//! Live reads fall back to these entries when the rolling buffer has nothing
//! fresh, so a reading stays on screen across short gaps in the stream. The
//! aggregator never reads from here.

use crate::backend::KvBackend;
use crate::clock::SharedClock;
use crate::error::BackendError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Key prefix for holdover entries.
pub const HOLDOVER_KEY_PREFIX: &str = "reading_cache:";

/// Default hold time in seconds.
pub const DEFAULT_HOLD_SECS: i64 = 30;

/// Metrics tracked by the holdover cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    HeartRate,
    Spo2,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::HeartRate, Metric::Spo2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeartRate => "heartRate",
            Metric::Spo2 => "spo2",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One held reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoverEntry {
    pub value: f64,
    /// Device timestamp of the reading
    pub original_timestamp: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    /// Always `cached_at + hold`
    pub expires_at: DateTime<Utc>,
}

impl HoldoverEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Joined view across all tracked metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldoverSnapshot {
    pub heart_rate: Option<HoldoverEntry>,
    pub spo2: Option<HoldoverEntry>,
}

impl HoldoverSnapshot {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.spo2.is_none()
    }
}

pub struct HoldoverCache {
    backend: Arc<dyn KvBackend>,
    clock: SharedClock,
}

impl HoldoverCache {
    pub fn new(backend: Arc<dyn KvBackend>, clock: SharedClock) -> Self {
        Self { backend, clock }
    }

    fn key(subject_id: &str, metric: Metric) -> String {
        format!("{HOLDOVER_KEY_PREFIX}{subject_id}:{metric}")
    }

    /// Hold `value` for `hold`, replacing any previous entry for this metric.
    pub async fn put(
        &self,
        subject_id: &str,
        metric: Metric,
        value: f64,
        original_timestamp: DateTime<Utc>,
        hold: Duration,
    ) -> Result<HoldoverEntry, BackendError> {
        let key = Self::key(subject_id, metric);
        let cached_at = self.clock.now();
        let entry = HoldoverEntry {
            value,
            original_timestamp,
            cached_at,
            expires_at: cached_at + hold,
        };
        let encoded = serde_json::to_string(&entry).map_err(|e| BackendError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.backend.set_with_ttl(&key, encoded, hold).await?;
        Ok(entry)
    }

    /// The held entry for `metric`, or `None` once it has expired.
    pub async fn get(
        &self,
        subject_id: &str,
        metric: Metric,
    ) -> Result<Option<HoldoverEntry>, BackendError> {
        let key = Self::key(subject_id, metric);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let entry: HoldoverEntry = serde_json::from_str(&raw).map_err(|e| BackendError::Decode {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        if entry.is_expired(self.clock.now()) {
            debug!(subject = subject_id, %metric, "Holdover entry expired");
            self.backend.delete(&key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn get_all(&self, subject_id: &str) -> Result<HoldoverSnapshot, BackendError> {
        let (heart_rate, spo2) = tokio::try_join!(
            self.get(subject_id, Metric::HeartRate),
            self.get(subject_id, Metric::Spo2),
        )?;
        Ok(HoldoverSnapshot { heart_rate, spo2 })
    }

    pub async fn clear(&self, subject_id: &str) -> Result<(), BackendError> {
        for metric in Metric::ALL {
            self.backend.delete(&Self::key(subject_id, metric)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKv;
    use crate::clock::{Clock, ManualClock};
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, HoldoverCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryKv::new(clock.clone()));
        (clock.clone(), HoldoverCache::new(backend, clock))
    }

    #[tokio::test]
    async fn test_hold_window() {
        let (clock, cache) = setup();
        let t0 = clock.now();
        let entry = cache
            .put("a", Metric::HeartRate, 72.0, t0, Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(entry.expires_at, entry.cached_at + Duration::seconds(30));

        clock.advance(Duration::seconds(29));
        let held = cache.get("a", Metric::HeartRate).await.unwrap();
        assert_eq!(held.map(|e| e.value), Some(72.0));

        clock.advance(Duration::seconds(2));
        assert!(cache.get("a", Metric::HeartRate).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_reading_supersedes() {
        let (clock, cache) = setup();
        let t0 = clock.now();
        cache.put("a", Metric::Spo2, 97.0, t0, Duration::seconds(30)).await.unwrap();
        clock.advance(Duration::seconds(20));
        cache
            .put("a", Metric::Spo2, 95.0, clock.now(), Duration::seconds(30))
            .await
            .unwrap();
        clock.advance(Duration::seconds(20));

        let held = cache.get("a", Metric::Spo2).await.unwrap().unwrap();
        assert_eq!(held.value, 95.0);
    }

    #[tokio::test]
    async fn test_get_all_metrics_independent() {
        let (clock, cache) = setup();
        let t0 = clock.now();
        cache.put("a", Metric::HeartRate, 80.0, t0, Duration::seconds(10)).await.unwrap();
        cache.put("a", Metric::Spo2, 96.0, t0, Duration::seconds(60)).await.unwrap();

        clock.advance(Duration::seconds(30));
        let snapshot = cache.get_all("a").await.unwrap();
        assert!(snapshot.heart_rate.is_none());
        assert_eq!(snapshot.spo2.map(|e| e.value), Some(96.0));

        cache.clear("a").await.unwrap();
        assert!(cache.get_all("a").await.unwrap().is_empty());
    }
}

//! Device-facing ingestion and live reads.

use super::types::{RawSample, VitalReading};
use crate::clock::SharedClock;
use crate::core::buffer::RollingBuffer;
use crate::core::holdover::{HoldoverCache, HoldoverSnapshot, Metric};
use crate::core::rate_limiter::RateLimiter;
use crate::error::{BackendError, IngestError};
use crate::stats::SharedPipelineStats;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// The best current view of a subject's vitals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum LiveReading {
    /// Newest buffered sample, younger than the hold duration
    Fresh(RawSample),
    /// Stream went quiet; last known values from the holdover cache
    Held(HoldoverSnapshot),
    Unavailable,
}

pub struct IngestService {
    buffer: Arc<RollingBuffer>,
    holdover: Arc<HoldoverCache>,
    limiter: RateLimiter,
    clock: SharedClock,
    stats: SharedPipelineStats,
    hold: Duration,
}

impl IngestService {
    pub fn new(
        buffer: Arc<RollingBuffer>,
        holdover: Arc<HoldoverCache>,
        limiter: RateLimiter,
        clock: SharedClock,
        stats: SharedPipelineStats,
        hold: Duration,
    ) -> Self {
        Self {
            buffer,
            holdover,
            limiter,
            clock,
            stats,
            hold,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Accept one validated reading for `subject_id`.
    ///
    /// Overload is rejected before anything is written. Backend failures are
    /// returned to the caller.
    pub async fn ingest(
        &self,
        subject_id: &str,
        reading: VitalReading,
    ) -> Result<RawSample, IngestError> {
        if !self.limiter.is_allowed(subject_id).await {
            self.stats.record_sample_rejected();
            warn!(subject = subject_id, "Ingestion rate limit exceeded");
            return Err(IngestError::RateLimited {
                subject_id: subject_id.to_string(),
                max_requests: self.limiter.max_requests(),
                window_secs: self.limiter.window().num_seconds(),
            });
        }

        let sample = reading.into_sample(subject_id, self.clock.now());
        self.buffer.append(&sample).await?;

        tokio::try_join!(
            self.holdover.put(
                subject_id,
                Metric::HeartRate,
                sample.heart_rate,
                sample.device_timestamp,
                self.hold,
            ),
            self.holdover.put(
                subject_id,
                Metric::Spo2,
                sample.spo2,
                sample.device_timestamp,
                self.hold,
            ),
        )?;

        self.stats.record_sample_ingested();
        Ok(sample)
    }

    /// Current vitals for `subject_id`: a fresh buffered sample if there is
    /// one, otherwise whatever the holdover cache still holds.
    pub async fn live(&self, subject_id: &str) -> Result<LiveReading, BackendError> {
        if let Some(sample) = self.buffer.latest(subject_id).await? {
            if self.clock.now() - sample.server_timestamp <= self.hold {
                return Ok(LiveReading::Fresh(sample));
            }
        }

        let snapshot = self.holdover.get_all(subject_id).await?;
        if snapshot.is_empty() {
            debug!(subject = subject_id, "No live data");
            Ok(LiveReading::Unavailable)
        } else {
            Ok(LiveReading::Held(snapshot))
        }
    }
}

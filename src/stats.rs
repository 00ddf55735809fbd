//! Runtime counters for the vitals pipeline.
//!
//! Counts only; no subject identifiers or vital values are retained here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Pipeline statistics for the current process.
#[derive(Debug)]
pub struct PipelineStats {
    /// Samples accepted into a rolling buffer
    samples_ingested: AtomicU64,
    /// Samples rejected by the rate limiter
    samples_rejected: AtomicU64,
    ticks_completed: AtomicU64,
    /// Ticks that found a tick already running
    ticks_skipped: AtomicU64,
    rollups_written: AtomicU64,
    events_written: AtomicU64,
    /// Events dropped inside the cooldown
    events_suppressed: AtomicU64,
    subject_failures: AtomicU64,
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            ticks_completed: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            rollups_written: AtomicU64::new(0),
            events_written: AtomicU64::new(0),
            events_suppressed: AtomicU64::new(0),
            subject_failures: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            warn!("Could not load previous pipeline stats: {}", e);
        }

        stats
    }

    pub fn record_sample_ingested(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_completed(&self) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollup_written(&self) {
        self.rollups_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_written(&self) {
        self.events_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_suppressed(&self) {
        self.events_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subject_failure(&self) {
        self.subject_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            rollups_written: self.rollups_written.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
            subject_failures: self.subject_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Samples ingested: {}\n\
             - Samples rejected (rate limit): {}\n\
             - Aggregation ticks: {} completed, {} skipped\n\
             - Rollups written: {}\n\
             - Health events: {} written, {} suppressed\n\
             - Subject failures: {}\n\
             - Uptime: {} seconds",
            stats.samples_ingested,
            stats.samples_rejected,
            stats.ticks_completed,
            stats.ticks_skipped,
            stats.rollups_written,
            stats.events_written,
            stats.events_suppressed,
            stats.subject_failures,
            stats.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                samples_ingested: stats.samples_ingested,
                samples_rejected: stats.samples_rejected,
                ticks_completed: stats.ticks_completed,
                ticks_skipped: stats.ticks_skipped,
                rollups_written: stats.rollups_written,
                events_written: stats.events_written,
                events_suppressed: stats.events_suppressed,
                subject_failures: stats.subject_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Read persisted stats without constructing a live counter set.
    pub fn read_persisted(
        path: &std::path::Path,
    ) -> Result<Option<PersistedStats>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted = serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(persisted))
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(persisted) = self
            .persist_path
            .as_deref()
            .map(Self::read_persisted)
            .transpose()?
            .flatten()
        else {
            return Ok(());
        };

        self.samples_ingested.store(persisted.samples_ingested, Ordering::Relaxed);
        self.samples_rejected.store(persisted.samples_rejected, Ordering::Relaxed);
        self.ticks_completed.store(persisted.ticks_completed, Ordering::Relaxed);
        self.ticks_skipped.store(persisted.ticks_skipped, Ordering::Relaxed);
        self.rollups_written.store(persisted.rollups_written, Ordering::Relaxed);
        self.events_written.store(persisted.events_written, Ordering::Relaxed);
        self.events_suppressed.store(persisted.events_suppressed, Ordering::Relaxed);
        self.subject_failures.store(persisted.subject_failures, Ordering::Relaxed);
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.samples_ingested.store(0, Ordering::Relaxed);
        self.samples_rejected.store(0, Ordering::Relaxed);
        self.ticks_completed.store(0, Ordering::Relaxed);
        self.ticks_skipped.store(0, Ordering::Relaxed);
        self.rollups_written.store(0, Ordering::Relaxed);
        self.events_written.store(0, Ordering::Relaxed);
        self.events_suppressed.store(0, Ordering::Relaxed);
        self.subject_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub rollups_written: u64,
    pub events_written: u64,
    pub events_suppressed: u64,
    pub subject_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub rollups_written: u64,
    pub events_written: u64,
    pub events_suppressed: u64,
    pub subject_failures: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared pipeline stats.
pub type SharedPipelineStats = Arc<PipelineStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = PipelineStats::new();

        stats.record_sample_ingested();
        stats.record_sample_ingested();
        stats.record_sample_rejected();
        stats.record_tick_skipped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_ingested, 2);
        assert_eq!(snapshot.samples_rejected, 1);
        assert_eq!(snapshot.ticks_skipped, 1);
        assert_eq!(snapshot.ticks_completed, 0);
    }

    #[test]
    fn test_reset() {
        let stats = PipelineStats::new();
        stats.record_rollup_written();
        stats.record_event_written();
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rollups_written, 0);
        assert_eq!(snapshot.events_written, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = PipelineStats::new().summary();
        assert!(summary.contains("Samples ingested"));
        assert!(summary.contains("Aggregation ticks"));
        assert!(summary.contains("suppressed"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("vitals-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");

        let stats = PipelineStats::with_persistence(path.clone());
        stats.record_sample_ingested();
        stats.record_event_suppressed();
        stats.save().unwrap();

        let reloaded = PipelineStats::with_persistence(path.clone());
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.samples_ingested, 1);
        assert_eq!(snapshot.events_suppressed, 1);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

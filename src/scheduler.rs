//! Periodic aggregation over every active subject.
//!
//! A [`Scheduler`] is either idle or running a tick. The run flag is a single
//! atomic compare-and-swap owned by the scheduler instance: a tick that finds
//! another tick in flight returns [`TickOutcome::Skipped`] without queuing.
//! Within a tick, subjects are aggregated on a bounded pool of tasks and a
//! failing subject never aborts the rest.

use crate::config::SchedulerConfig;
use crate::core::aggregation::{aggregate, detect_events, IntervalType};
use crate::core::buffer::RollingBuffer;
use crate::core::dedup::{DedupOutcome, EventDeduplicator};
use crate::error::PipelineError;
use crate::stats::SharedPipelineStats;
use crate::store::DurableStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// What one subject contributed to a tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubjectReport {
    pub rollup_written: bool,
    pub events_written: usize,
    pub events_suppressed: usize,
}

/// Summary of a completed tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub subjects: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rollups_written: usize,
    pub events_written: usize,
    pub events_suppressed: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl TickReport {
    fn absorb(&mut self, report: &SubjectReport) {
        self.succeeded += 1;
        self.rollups_written += usize::from(report.rollup_written);
        self.events_written += report.events_written;
        self.events_suppressed += report.events_suppressed;
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick was already running
    Skipped,
    Completed(TickReport),
    /// Active subjects could not be listed, or a manually triggered subject
    /// failed to aggregate
    Failed(PipelineError),
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Releases the run flag however the tick ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reads, aggregates and persists one subject.
struct SubjectAggregator {
    buffer: Arc<RollingBuffer>,
    store: Arc<dyn DurableStore>,
    dedup: EventDeduplicator,
    stats: SharedPipelineStats,
    samples_per_rollup: usize,
    interval_type: IntervalType,
}

impl SubjectAggregator {
    async fn run(&self, subject_id: &str) -> Result<SubjectReport, PipelineError> {
        let samples = self
            .buffer
            .read_recent(subject_id, self.samples_per_rollup)
            .await?;
        let mut report = SubjectReport::default();

        let Some(rollup) = aggregate(&samples, self.interval_type) else {
            debug!(subject = subject_id, "No samples to aggregate");
            return Ok(report);
        };
        let candidates = detect_events(&samples);

        self.store.create_rollup(rollup).await?;
        self.stats.record_rollup_written();
        report.rollup_written = true;

        for event in candidates {
            match self.dedup.submit(event).await? {
                DedupOutcome::Persisted(_) => {
                    self.stats.record_event_written();
                    report.events_written += 1;
                }
                DedupOutcome::Suppressed => {
                    self.stats.record_event_suppressed();
                    report.events_suppressed += 1;
                }
            }
        }

        Ok(report)
    }
}

pub struct Scheduler {
    aggregator: Arc<SubjectAggregator>,
    buffer: Arc<RollingBuffer>,
    stats: SharedPipelineStats,
    running: AtomicBool,
    interval: Duration,
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(
        buffer: Arc<RollingBuffer>,
        store: Arc<dyn DurableStore>,
        dedup: EventDeduplicator,
        stats: SharedPipelineStats,
        config: &SchedulerConfig,
    ) -> Self {
        let aggregator = SubjectAggregator {
            buffer: buffer.clone(),
            store,
            dedup,
            stats: stats.clone(),
            samples_per_rollup: config.samples_per_rollup.max(1),
            interval_type: IntervalType::Minute,
        };
        Self {
            aggregator: Arc::new(aggregator),
            buffer,
            stats,
            running: AtomicBool::new(false),
            interval: config.interval,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one aggregation pass over every active subject, unless a pass is
    /// already in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            self.stats.record_tick_skipped();
            info!("Previous aggregation still running, skipping tick");
            return TickOutcome::Skipped;
        };

        let started = Instant::now();
        let subjects = match self.buffer.list_subjects().await {
            Ok(subjects) => subjects,
            Err(e) => {
                error!("Failed to list active subjects: {}", e);
                return TickOutcome::Failed(e.into());
            }
        };

        let mut report = TickReport {
            subjects: subjects.len(),
            ..TickReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();
        for subject_id in subjects {
            let aggregator = self.aggregator.clone();
            let permits = permits.clone();
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = aggregator.run(&subject_id).await;
                (subject_id, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(subject_report))) => report.absorb(&subject_report),
                Ok((subject_id, Err(e))) => {
                    self.stats.record_subject_failure();
                    report.failed += 1;
                    error!(subject = %subject_id, "Aggregation failed: {}", e);
                }
                Err(e) => {
                    self.stats.record_subject_failure();
                    report.failed += 1;
                    error!("Aggregation task panicked: {}", e);
                }
            }
        }

        report.duration = started.elapsed();
        self.stats.record_tick_completed();
        info!(
            subjects = report.subjects,
            succeeded = report.succeeded,
            failed = report.failed,
            rollups = report.rollups_written,
            events = report.events_written,
            suppressed = report.events_suppressed,
            duration_ms = report.duration.as_millis() as u64,
            "Aggregation tick complete"
        );
        TickOutcome::Completed(report)
    }

    /// Manual trigger. A named subject is aggregated immediately, outside the
    /// run flag, and its failure is the trigger's failure; otherwise this is a
    /// regular [`tick`](Self::tick).
    pub async fn trigger(&self, subject_id: Option<&str>) -> TickOutcome {
        let Some(subject_id) = subject_id else {
            return self.tick().await;
        };

        let started = Instant::now();
        let mut report = TickReport {
            subjects: 1,
            ..TickReport::default()
        };
        match self.aggregator.run(subject_id).await {
            Ok(subject_report) => report.absorb(&subject_report),
            Err(e) => {
                self.stats.record_subject_failure();
                error!(subject = subject_id, "Manual aggregation failed: {}", e);
                return TickOutcome::Failed(e);
            }
        }
        report.duration = started.elapsed();
        info!(
            subject = subject_id,
            rollups = report.rollups_written,
            "Manual aggregation complete"
        );
        TickOutcome::Completed(report)
    }

    /// Drive [`tick`](Self::tick) on the configured period until `shutdown`
    /// turns true. The first tick fires immediately.
    ///
    /// Each tick runs on its own task, so a slow tick is observed by the next
    /// one as running and skipped. The returned handle resolves only after
    /// every in-flight tick has finished.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // interval() panics on a zero period.
            let period = self.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Aggregation scheduler started");

            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = self.clone();
                        in_flight.spawn(async move { scheduler.tick().await });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if !in_flight.is_empty() {
                info!(ticks = in_flight.len(), "Waiting for in-flight aggregation");
            }
            while in_flight.join_next().await.is_some() {}
            info!("Aggregation scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKv;
    use crate::clock::{Clock, ManualClock};
    use crate::core::aggregation::{EventType, HealthEvent, RollupRecord};
    use crate::error::StoreError;
    use crate::ingest::types::{RawSample, Vector3};
    use crate::stats::PipelineStats;
    use crate::store::{EventQuery, MemoryStore, RollupQuery};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    /// Store whose rollup writes wait on a gate, and fail for one subject.
    /// With `gated_subject` set, only that subject's writes wait.
    struct GatedStore {
        inner: MemoryStore,
        gate: Semaphore,
        gated_subject: Option<String>,
        failing_subject: Option<String>,
    }

    impl GatedStore {
        fn open() -> Self {
            Self {
                inner: MemoryStore::new(),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                gated_subject: None,
                failing_subject: None,
            }
        }

        fn gates(&self, subject_id: &str) -> bool {
            self.gated_subject.as_deref().map_or(true, |gated| gated == subject_id)
        }

        fn closed() -> Self {
            Self {
                gate: Semaphore::new(0),
                ..Self::open()
            }
        }
    }

    #[async_trait]
    impl DurableStore for GatedStore {
        async fn create_rollup(&self, rollup: RollupRecord) -> Result<(), StoreError> {
            let _permit = if self.gates(&rollup.subject_id) {
                Some(
                    self.gate
                        .acquire()
                        .await
                        .map_err(|e| StoreError::Unavailable(e.to_string()))?,
                )
            } else {
                None
            };
            if self.failing_subject.as_deref() == Some(rollup.subject_id.as_str()) {
                return Err(StoreError::Unavailable("write rejected".to_string()));
            }
            self.inner.create_rollup(rollup).await
        }

        async fn create_event(&self, event: HealthEvent) -> Result<HealthEvent, StoreError> {
            self.inner.create_event(event).await
        }

        async fn find_recent_event(
            &self,
            subject_id: &str,
            event_type: EventType,
            since: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.find_recent_event(subject_id, event_type, since).await
        }

        async fn rollups(&self, query: RollupQuery) -> Result<Vec<RollupRecord>, StoreError> {
            self.inner.rollups(query).await
        }

        async fn events(&self, query: EventQuery) -> Result<Vec<HealthEvent>, StoreError> {
            self.inner.events(query).await
        }

        async fn acknowledge_event(
            &self,
            subject_id: &str,
            event_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<HealthEvent, StoreError> {
            self.inner.acknowledge_event(subject_id, event_id, at).await
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        buffer: Arc<RollingBuffer>,
        store: Arc<GatedStore>,
        scheduler: Arc<Scheduler>,
    }

    fn harness(store: GatedStore) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 30).unwrap(),
        ));
        let backend = Arc::new(MemoryKv::new(clock.clone()));
        let buffer = Arc::new(RollingBuffer::new(
            backend,
            clock.clone(),
            900,
            chrono::Duration::seconds(900),
        ));
        let store = Arc::new(store);
        let dedup =
            EventDeduplicator::new(store.clone(), clock.clone(), chrono::Duration::minutes(5));
        let scheduler = Arc::new(Scheduler::new(
            buffer.clone(),
            store.clone(),
            dedup,
            Arc::new(PipelineStats::new()),
            &SchedulerConfig::default(),
        ));
        Harness {
            clock,
            buffer,
            store,
            scheduler,
        }
    }

    async fn feed(h: &Harness, subject: &str, temperature_c: f64) {
        let now = h.clock.now();
        let sample = RawSample {
            subject_id: subject.to_string(),
            heart_rate: 72.0,
            spo2: 98.0,
            temperature_c,
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::default(),
            device_timestamp: now,
            server_timestamp: now,
        };
        h.buffer.append(&sample).await.unwrap();
    }

    #[tokio::test]
    async fn test_one_rollup_per_active_subject() {
        let h = harness(GatedStore::open());
        for subject in ["a", "b", "c"] {
            feed(&h, subject, 36.6).await;
        }

        let outcome = h.scheduler.tick().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.subjects, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.rollups_written, 3);
        assert_eq!(h.store.inner.rollup_count(), 3);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_tick_while_running_is_skipped() {
        let h = harness(GatedStore::closed());
        feed(&h, "a", 36.6).await;
        feed(&h, "b", 36.6).await;

        let first = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.tick().await })
        };
        while !h.scheduler.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(h.scheduler.tick().await, TickOutcome::Skipped));

        h.store.gate.add_permits(Semaphore::MAX_PERMITS);
        let outcome = first.await.unwrap();
        assert_eq!(outcome.report().map(|r| r.rollups_written), Some(2));
        assert!(!h.scheduler.is_running());

        // Idle again: the next tick runs.
        let again = h.scheduler.tick().await;
        assert_eq!(again.report().map(|r| r.rollups_written), Some(2));
        assert_eq!(h.store.inner.rollup_count(), 4);
    }

    #[tokio::test]
    async fn test_failing_subject_does_not_abort_tick() {
        let h = harness(GatedStore {
            failing_subject: Some("bad".to_string()),
            ..GatedStore::open()
        });
        for subject in ["a", "bad", "c"] {
            feed(&h, subject, 36.6).await;
        }

        let outcome = h.scheduler.tick().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.inner.rollup_count(), 2);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_events_deduplicated_across_ticks() {
        let h = harness(GatedStore::open());
        feed(&h, "a", 39.4).await;

        let first = h.scheduler.tick().await;
        assert_eq!(first.report().map(|r| r.events_written), Some(1));

        h.clock.advance(chrono::Duration::minutes(1));
        feed(&h, "a", 39.4).await;
        let second = h.scheduler.tick().await;
        let report = second.report().unwrap();
        assert_eq!(report.events_written, 0);
        assert_eq!(report.events_suppressed, 1);

        let events = h.store.events(EventQuery::new("a")).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Fever);
    }

    #[tokio::test]
    async fn test_manual_trigger_single_subject() {
        let h = harness(GatedStore::open());
        feed(&h, "a", 36.6).await;
        feed(&h, "b", 36.6).await;

        let outcome = h.scheduler.trigger(Some("a")).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.subjects, 1);
        assert_eq!(report.rollups_written, 1);

        let rollups = h.store.rollups(RollupQuery::new("a")).await.unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(
            rollups[0].interval_start,
            Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
        );
        assert!(h.store.rollups(RollupQuery::new("b")).await.unwrap().is_empty());

        let full = h.scheduler.trigger(None).await;
        assert_eq!(full.report().map(|r| r.subjects), Some(2));
    }

    #[tokio::test]
    async fn test_manual_trigger_bypasses_running_tick() {
        let h = harness(GatedStore {
            gated_subject: Some("b".to_string()),
            ..GatedStore::closed()
        });
        feed(&h, "a", 36.6).await;
        feed(&h, "b", 36.6).await;

        let first = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.tick().await })
        };
        // "a" goes through; the tick parks on "b".
        while h.store.inner.rollup_count() == 0 || !h.scheduler.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(h.scheduler.is_running());

        let manual = h.scheduler.trigger(Some("a")).await;
        assert_eq!(manual.report().map(|r| r.rollups_written), Some(1));
        assert!(h.scheduler.is_running());
        assert!(matches!(h.scheduler.tick().await, TickOutcome::Skipped));

        h.store.gate.add_permits(Semaphore::MAX_PERMITS);
        let outcome = first.await.unwrap();
        assert_eq!(outcome.report().map(|r| r.rollups_written), Some(2));
        assert_eq!(h.store.rollups(RollupQuery::new("a")).await.unwrap().len(), 2);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_manual_trigger_reports_subject_failure() {
        let h = harness(GatedStore {
            failing_subject: Some("a".to_string()),
            ..GatedStore::open()
        });
        feed(&h, "a", 36.6).await;

        let outcome = h.scheduler.trigger(Some("a")).await;
        assert!(matches!(outcome, TickOutcome::Failed(PipelineError::Store(_))));
        assert!(outcome.report().is_none());
        assert_eq!(h.store.inner.rollup_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_subject_trigger_writes_nothing() {
        let h = harness(GatedStore::open());
        let outcome = h.scheduler.trigger(Some("ghost")).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.rollups_written, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_ticks_and_stops() {
        let h = harness(GatedStore::open());
        feed(&h, "a", 36.6).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = h.scheduler.clone().spawn(shutdown_rx);

        // First tick fires immediately.
        while h.store.inner.rollup_count() == 0 {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(h.store.inner.rollup_count() >= 1);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_waits_for_in_flight_tick() {
        let h = harness(GatedStore::closed());
        feed(&h, "a", 36.6).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = h.scheduler.clone().spawn(shutdown_rx);
        while !h.scheduler.is_running() {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());
        assert_eq!(h.store.inner.rollup_count(), 0);

        h.store.gate.add_permits(Semaphore::MAX_PERMITS);
        handle.await.unwrap();
        assert_eq!(h.store.inner.rollup_count(), 1);
        assert!(!h.scheduler.is_running());
    }
}

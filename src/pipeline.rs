//! Assembly of the vitals pipeline from configuration.

use crate::backend::{KvBackend, MemoryKv};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, MAX_DURATION};
use crate::core::aggregation::{HealthEvent, IntervalType, RollupRecord};
use crate::core::buffer::RollingBuffer;
use crate::core::dedup::EventDeduplicator;
use crate::core::holdover::HoldoverCache;
use crate::core::rate_limiter::{RateLimiter, INGEST_LIMITER_PREFIX};
use crate::error::StoreError;
use crate::ingest::IngestService;
use crate::scheduler::Scheduler;
use crate::stats::{PipelineStats, SharedPipelineStats};
use crate::store::{DurableStore, EventQuery, HistoryRange, MemoryStore, RollupQuery};
use std::sync::Arc;
use uuid::Uuid;

/// Convert a configured duration for the chrono-based components, clamped
/// to [`MAX_DURATION`] so expiry arithmetic stays in range.
pub(crate) fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d.min(MAX_DURATION)).unwrap_or_else(|_| chrono::Duration::days(30))
}

/// All pipeline components, wired over one backend, store and clock.
pub struct Pipeline {
    config: Config,
    clock: SharedClock,
    store: Arc<dyn DurableStore>,
    stats: SharedPipelineStats,
    buffer: Arc<RollingBuffer>,
    holdover: Arc<HoldoverCache>,
    ingest: Arc<IngestService>,
    scheduler: Arc<Scheduler>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        backend: Arc<dyn KvBackend>,
        store: Arc<dyn DurableStore>,
        clock: SharedClock,
        stats: SharedPipelineStats,
    ) -> Self {
        let buffer = Arc::new(RollingBuffer::new(
            backend.clone(),
            clock.clone(),
            config.buffer.capacity,
            to_chrono(config.buffer.retention),
        ));
        let holdover = Arc::new(HoldoverCache::new(backend.clone(), clock.clone()));
        let limiter = RateLimiter::new(
            backend,
            clock.clone(),
            INGEST_LIMITER_PREFIX,
            config.rate_limit.max_requests,
            to_chrono(config.rate_limit.window),
        );
        let ingest = Arc::new(IngestService::new(
            buffer.clone(),
            holdover.clone(),
            limiter,
            clock.clone(),
            stats.clone(),
            to_chrono(config.holdover.hold),
        ));
        let dedup = EventDeduplicator::new(
            store.clone(),
            clock.clone(),
            to_chrono(config.dedup.cooldown),
        );
        let scheduler = Arc::new(Scheduler::new(
            buffer.clone(),
            store.clone(),
            dedup,
            stats.clone(),
            &config.scheduler,
        ));

        Self {
            config,
            clock,
            store,
            stats,
            buffer,
            holdover,
            ingest,
            scheduler,
        }
    }

    /// In-process backend and store on the given clock.
    pub fn in_memory_with_clock(config: Config, clock: SharedClock) -> Self {
        let backend = Arc::new(MemoryKv::new(clock.clone()));
        Self::new(
            config,
            backend,
            Arc::new(MemoryStore::new()),
            clock,
            Arc::new(PipelineStats::new()),
        )
    }

    /// In-process backend and store on the system clock.
    pub fn in_memory(config: Config) -> Self {
        Self::in_memory_with_clock(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn stats(&self) -> &SharedPipelineStats {
        &self.stats
    }

    pub fn buffer(&self) -> &Arc<RollingBuffer> {
        &self.buffer
    }

    pub fn holdover(&self) -> &Arc<HoldoverCache> {
        &self.holdover
    }

    pub fn ingest(&self) -> &Arc<IngestService> {
        &self.ingest
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Rollup history for `subject_id` over the trailing `range`.
    pub async fn history(
        &self,
        subject_id: &str,
        range: HistoryRange,
        interval_type: IntervalType,
    ) -> Result<Vec<RollupRecord>, StoreError> {
        let query = RollupQuery::new(subject_id)
            .interval(interval_type)
            .since(range.since(self.clock.now()));
        self.store.rollups(query).await
    }

    pub async fn events(&self, query: EventQuery) -> Result<Vec<HealthEvent>, StoreError> {
        self.store.events(query).await
    }

    /// Acknowledge an event now.
    pub async fn acknowledge(
        &self,
        subject_id: &str,
        event_id: Uuid,
    ) -> Result<HealthEvent, StoreError> {
        self.store
            .acknowledge_event(subject_id, event_id, self.clock.now())
            .await
    }
}

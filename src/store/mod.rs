//! Durable storage for rollups and health events.
//!
//! [`DurableStore`] is the seam between the pipeline and whatever document
//! store keeps history. [`MemoryStore`] is the in-process implementation used
//! by the binary and the tests.

pub mod memory;

use crate::core::aggregation::{EventType, HealthEvent, IntervalType, RollupRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryStore;

/// Default row cap for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default row cap for event queries.
pub const DEFAULT_EVENTS_LIMIT: usize = 50;

/// Trailing range for a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryRange {
    #[default]
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl HistoryRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(HistoryRange::Hour),
            "24h" => Some(HistoryRange::Day),
            "7d" => Some(HistoryRange::Week),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            HistoryRange::Hour => Duration::hours(1),
            HistoryRange::Day => Duration::hours(24),
            HistoryRange::Week => Duration::days(7),
        }
    }

    /// Start of the range ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

/// Filter for [`DurableStore::rollups`].
#[derive(Debug, Clone, PartialEq)]
pub struct RollupQuery {
    pub subject_id: String,
    pub interval_type: IntervalType,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl RollupQuery {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            interval_type: IntervalType::Minute,
            since: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn interval(mut self, interval_type: IntervalType) -> Self {
        self.interval_type = interval_type;
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Filter for [`DurableStore::events`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub subject_id: String,
    pub acknowledged: Option<bool>,
    pub limit: usize,
}

impl EventQuery {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            acknowledged: None,
            limit: DEFAULT_EVENTS_LIMIT,
        }
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = Some(acknowledged);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Persistent home of rollups and health events.
///
/// Failures are not retried here; callers log and move on.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn create_rollup(&self, rollup: RollupRecord) -> Result<(), StoreError>;

    async fn create_event(&self, event: HealthEvent) -> Result<HealthEvent, StoreError>;

    /// Whether `subject_id` has an event of `event_type` at or after `since`.
    async fn find_recent_event(
        &self,
        subject_id: &str,
        event_type: EventType,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Rollups matching `query`, newest `interval_start` first.
    async fn rollups(&self, query: RollupQuery) -> Result<Vec<RollupRecord>, StoreError>;

    /// Events matching `query`, newest first.
    async fn events(&self, query: EventQuery) -> Result<Vec<HealthEvent>, StoreError>;

    /// Mark an event acknowledged at `at`. Returns the updated event.
    async fn acknowledge_event(
        &self,
        subject_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<HealthEvent, StoreError>;
}

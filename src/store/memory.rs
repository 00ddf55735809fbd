//! In-process durable store with optional JSON snapshot persistence.

use super::{DurableStore, EventQuery, RollupQuery};
use crate::core::aggregation::{EventType, HealthEvent, RollupRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    rollups: Vec<RollupRecord>,
    events: Vec<HealthEvent>,
}

/// Snapshot format on disk.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    rollups: Vec<RollupRecord>,
    events: Vec<HealthEvent>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    /// Path for persisting the snapshot
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that loads from and saves to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut store = Self::new();
        store.persist_path = Some(path);

        if let Err(e) = store.load() {
            warn!("Could not load previous store snapshot: {}", e);
        }

        store
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    pub fn rollup_count(&self) -> usize {
        self.read().map(|s| s.rollups.len()).unwrap_or(0)
    }

    pub fn event_count(&self) -> usize {
        self.read().map(|s| s.events.len()).unwrap_or(0)
    }

    /// Write the snapshot to disk. A store without a path does nothing.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = {
            let state = self.read()?;
            PersistedStore {
                rollups: state.rollups.clone(),
                events: state.events.clone(),
                last_updated: Utc::now(),
            }
        };
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;

        debug!(
            rollups = persisted.rollups.len(),
            events = persisted.events.len(),
            "Saved store snapshot"
        );
        Ok(())
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStore = serde_json::from_str(&content)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let state = self
            .state
            .get_mut()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        state.rollups = persisted.rollups;
        state.events = persisted.events;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn create_rollup(&self, rollup: RollupRecord) -> Result<(), StoreError> {
        self.write()?.rollups.push(rollup);
        Ok(())
    }

    async fn create_event(&self, event: HealthEvent) -> Result<HealthEvent, StoreError> {
        self.write()?.events.push(event.clone());
        Ok(event)
    }

    async fn find_recent_event(
        &self,
        subject_id: &str,
        event_type: EventType,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.read()?.events.iter().any(|e| {
            e.subject_id == subject_id && e.event_type == event_type && e.timestamp >= since
        }))
    }

    async fn rollups(&self, query: RollupQuery) -> Result<Vec<RollupRecord>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<RollupRecord> = state
            .rollups
            .iter()
            .filter(|r| r.subject_id == query.subject_id)
            .filter(|r| r.interval_type == query.interval_type)
            .filter(|r| query.since.map_or(true, |since| r.interval_start >= since))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.interval_start.cmp(&a.interval_start));
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn events(&self, query: EventQuery) -> Result<Vec<HealthEvent>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<HealthEvent> = state
            .events
            .iter()
            .filter(|e| e.subject_id == query.subject_id)
            .filter(|e| query.acknowledged.map_or(true, |ack| e.acknowledged == ack))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn acknowledge_event(
        &self,
        subject_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<HealthEvent, StoreError> {
        let mut state = self.write()?;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id && e.subject_id == subject_id)
            .ok_or_else(|| StoreError::EventNotFound {
                subject_id: subject_id.to_string(),
                event_id: event_id.to_string(),
            })?;

        // Repeat acknowledgements keep the first timestamp.
        if !event.acknowledged {
            event.acknowledged = true;
            event.acknowledged_at = Some(at);
        }
        Ok(event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregation::{ActivityLevel, EventMetadata, IntervalType, Severity};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
    }

    fn rollup(subject: &str, start: DateTime<Utc>) -> RollupRecord {
        RollupRecord {
            subject_id: subject.to_string(),
            interval_type: IntervalType::Minute,
            interval_start: start,
            avg_heart_rate: 72.0,
            min_heart_rate: 70.0,
            max_heart_rate: 75.0,
            avg_spo2: 98.0,
            avg_temperature_c: 36.6,
            activity_level: ActivityLevel::Resting,
            avg_accel_magnitude: 1.0,
            sample_count: 60,
        }
    }

    fn event(subject: &str, event_type: EventType, at: DateTime<Utc>) -> HealthEvent {
        HealthEvent {
            id: Uuid::new_v4(),
            subject_id: subject.to_string(),
            event_type,
            value: 89.0,
            severity: Severity::Critical,
            timestamp: at,
            metadata: Some(EventMetadata {
                threshold: 90.0,
                accel_magnitude: None,
            }),
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_recent_event_window() {
        let store = MemoryStore::new();
        store.create_event(event("a", EventType::LowSpo2, t0())).await.unwrap();

        assert!(store.find_recent_event("a", EventType::LowSpo2, t0()).await.unwrap());
        assert!(!store
            .find_recent_event("a", EventType::LowSpo2, t0() + Duration::seconds(1))
            .await
            .unwrap());
        assert!(!store.find_recent_event("a", EventType::Fever, t0()).await.unwrap());
        assert!(!store.find_recent_event("b", EventType::LowSpo2, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollup_history_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.create_rollup(rollup("a", t0() + Duration::minutes(i))).await.unwrap();
        }
        store.create_rollup(rollup("b", t0())).await.unwrap();

        let rows = store
            .rollups(RollupQuery::new("a").since(t0() + Duration::minutes(2)).limit(2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].interval_start, t0() + Duration::minutes(4));
        assert_eq!(rows[1].interval_start, t0() + Duration::minutes(3));

        let hourly = store
            .rollups(RollupQuery::new("a").interval(IntervalType::Hour))
            .await
            .unwrap();
        assert!(hourly.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_and_filter() {
        let store = MemoryStore::new();
        let first = store.create_event(event("a", EventType::LowSpo2, t0())).await.unwrap();
        store
            .create_event(event("a", EventType::Fever, t0() + Duration::minutes(1)))
            .await
            .unwrap();

        let acked = store.acknowledge_event("a", first.id, t0()).await.unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_at, Some(t0()));

        let again = store
            .acknowledge_event("a", first.id, t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(again.acknowledged_at, Some(t0()));

        let open = store.events(EventQuery::new("a").acknowledged(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].event_type, EventType::Fever);

        let all = store.events(EventQuery::new("a")).await.unwrap();
        assert_eq!(all[0].event_type, EventType::Fever);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_event() {
        let store = MemoryStore::new();
        let e = store.create_event(event("a", EventType::LowSpo2, t0())).await.unwrap();

        let err = store.acknowledge_event("b", e.id, t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound { .. }));
        let err = store.acknowledge_event("a", Uuid::new_v4(), t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound { .. }));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = std::env::temp_dir().join(format!("vitals-store-{}", Uuid::new_v4()));
        let path = dir.join("store.json");

        let store = MemoryStore::with_persistence(path.clone());
        store.create_rollup(rollup("a", t0())).await.unwrap();
        store.create_event(event("a", EventType::LowSpo2, t0())).await.unwrap();
        store.save().unwrap();

        let reloaded = MemoryStore::with_persistence(path);
        assert_eq!(reloaded.rollup_count(), 1);
        assert_eq!(reloaded.event_count(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}

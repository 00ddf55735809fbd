//! Cooldown filter in front of health-event persistence.
//!
//! A candidate is dropped when the same subject already has an event of the
//! same type inside the trailing cooldown. This is a read-then-write check,
//! not a store constraint: two concurrent submissions for the same subject
//! and type can both pass.

use crate::clock::SharedClock;
use crate::core::aggregation::HealthEvent;
use crate::error::StoreError;
use crate::store::DurableStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

/// Default cooldown in seconds.
pub const DEFAULT_COOLDOWN_SECS: i64 = 5 * 60;

/// What happened to a submitted candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    Persisted(HealthEvent),
    Suppressed,
}

impl DedupOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, DedupOutcome::Persisted(_))
    }
}

pub struct EventDeduplicator {
    store: Arc<dyn DurableStore>,
    clock: SharedClock,
    cooldown: Duration,
}

impl EventDeduplicator {
    pub fn new(store: Arc<dyn DurableStore>, clock: SharedClock, cooldown: Duration) -> Self {
        Self {
            store,
            clock,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Persist `event` unless a same-typed event for the subject falls inside
    /// the cooldown.
    pub async fn submit(&self, event: HealthEvent) -> Result<DedupOutcome, StoreError> {
        let since = self.clock.now() - self.cooldown;
        let duplicate = self
            .store
            .find_recent_event(&event.subject_id, event.event_type, since)
            .await?;

        if duplicate {
            warn!(
                subject = %event.subject_id,
                event_type = %event.event_type,
                "Duplicate event suppressed"
            );
            return Ok(DedupOutcome::Suppressed);
        }

        let event = self.store.create_event(event).await?;
        info!(
            subject = %event.subject_id,
            event_type = %event.event_type,
            severity = ?event.severity,
            value = event.value,
            "Health event recorded"
        );
        Ok(DedupOutcome::Persisted(event))
    }
}

//! Core pipeline components.
//!
//! This module contains:
//! - The per-subject rolling buffer of raw samples
//! - The holdover cache backing live reads
//! - The sliding-window ingestion rate limiter
//! - Rollup aggregation and health-event detection
//! - The event cooldown filter

pub mod aggregation;
pub mod buffer;
pub mod dedup;
pub mod holdover;
pub mod rate_limiter;

// Re-export commonly used types
pub use aggregation::{
    aggregate, detect_events, ActivityLevel, EventMetadata, EventType, HealthEvent, IntervalType,
    RollupRecord, Severity,
};
pub use buffer::RollingBuffer;
pub use dedup::{DedupOutcome, EventDeduplicator};
pub use holdover::{HoldoverCache, HoldoverEntry, HoldoverSnapshot, Metric};
pub use rate_limiter::RateLimiter;

//! Synheart Vitals Pipeline - wearable telemetry to rollups and health events.
//!
//! This library ingests per-subject vital signs (heart rate, SpO₂, body
//! temperature, accelerometer, gyroscope) from wearable devices, keeps a
//! short rolling history per subject, and periodically turns that history
//! into per-minute rollups and deduplicated health events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Synheart Vitals Pipeline                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                │
//! │  │   Ingest   │──▶│Rate Limiter│──▶│  Rolling   │                │
//! │  │ (validate) │   │ (120/min)  │   │  Buffer    │                │
//! │  └────────────┘   └────────────┘   └────────────┘                │
//! │         │                                │                       │
//! │         ▼                                ▼ every minute          │
//! │  ┌────────────┐                   ┌────────────┐   ┌──────────┐  │
//! │  │  Holdover  │                   │ Scheduler  │──▶│Aggregate │  │
//! │  │   Cache    │                   │  (guard)   │   │ + Detect │  │
//! │  └────────────┘                   └────────────┘   └──────────┘  │
//! │                                                         │        │
//! │                                   ┌────────────┐   ┌──────────┐  │
//! │                                   │  Durable   │◀──│  Dedup   │  │
//! │                                   │   Store    │   │(cooldown)│  │
//! │                                   └────────────┘   └──────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use synheart_vitals_pipeline::{Config, Pipeline, SensorPayload, Vector3};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pipeline = Pipeline::in_memory(Config::default());
//!
//! let payload = SensorPayload {
//!     heart_rate: Some(72.0),
//!     spo2: Some(98.0),
//!     temperature: Some(36.6),
//!     accel: Some(Vector3::new(0.0, 0.0, 1.0)),
//!     ..Default::default()
//! };
//! pipeline.ingest().ingest("subject-1", payload.validate()?).await?;
//!
//! let outcome = pipeline.scheduler().tick().await;
//! println!("{:?}", outcome.report());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;
pub mod stats;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use backend::{KvBackend, MemoryKv};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, ConfigError};
pub use crate::core::{
    aggregate, detect_events, ActivityLevel, EventType, HealthEvent, IntervalType, RollupRecord,
    Severity,
};
pub use error::{BackendError, IngestError, PipelineError, StoreError, ValidationError};
pub use ingest::{IngestService, LiveReading, RawSample, SensorPayload, Vector3, VitalReading};
pub use pipeline::Pipeline;
pub use scheduler::{Scheduler, TickOutcome, TickReport};
pub use stats::{PipelineStats, SharedPipelineStats, StatsSnapshot};
pub use store::{DurableStore, EventQuery, HistoryRange, MemoryStore, RollupQuery};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Device ingestion for the vitals pipeline.
//!
//! Payloads are validated into [`VitalReading`]s here, before anything
//! reaches the rolling buffer.

pub mod service;
pub mod types;

pub use service::{IngestService, LiveReading};
pub use types::{RawSample, SensorPayload, Vector3, VitalReading};

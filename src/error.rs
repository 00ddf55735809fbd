//! Error types for the vitals pipeline.
//!
//! Every failure is scoped to a single request or a single subject; nothing
//! here is fatal to the process.

use thiserror::Error;

/// Failures talking to the key-value backend that holds rolling buffers,
/// holdover entries and rate-limit windows.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Key-value backend unavailable: {0}")]
    Unavailable(String),

    #[error("Key {key} holds a value of the wrong type")]
    WrongType { key: String },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode value at {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Failures talking to the durable document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Durable store unavailable: {0}")]
    Unavailable(String),

    #[error("Health event {event_id} not found for subject {subject_id}")]
    EventNotFound { subject_id: String, event_id: String },

    #[error("Store serialization error: {0}")]
    Serialization(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A device payload that must not reach the core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field} value {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Failures on the ingestion path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Rate limit exceeded for {subject_id}. Max {max_requests} requests per {window_secs}s.")]
    RateLimited {
        subject_id: String,
        max_requests: usize,
        window_secs: i64,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IngestError {
    /// Overload is recoverable by retrying later; backend failures are not
    /// the caller's fault.
    pub fn is_overload(&self) -> bool {
        matches!(self, IngestError::RateLimited { .. })
    }
}

/// Failure aggregating one subject.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Buffer read failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

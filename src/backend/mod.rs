//! Key-value backend for short-lived pipeline state.
//!
//! Rolling buffers, holdover entries and rate-limit windows all live behind
//! [`KvBackend`]. Each call is a single atomic per-key operation, so the
//! ingestion path and the scheduler can share state without in-process locks.

pub mod memory;

use crate::error::BackendError;
use async_trait::async_trait;
use chrono::Duration;

pub use memory::MemoryKv;

/// List, string and sorted-set primitives with per-key expiry.
///
/// List indices are inclusive, head-first (index 0 is the most recent push).
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Push a value onto the head of the list at `key`, creating it if needed.
    /// Returns the new list length.
    async fn list_push_front(&self, key: &str, value: String) -> Result<usize, BackendError>;

    /// Keep only elements `start..=stop` of the list at `key`.
    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), BackendError>;

    /// Read elements `start..=stop` of the list at `key`.
    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, BackendError>;

    /// Length of the list at `key` (0 when absent).
    async fn list_len(&self, key: &str) -> Result<usize, BackendError>;

    /// Pop elements off the tail of the list at `key` while `pred` holds for
    /// the current tail, in one atomic step. An emptied list is deleted.
    /// Returns how many were removed.
    async fn list_drop_tail_while(
        &self,
        key: &str,
        pred: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> Result<usize, BackendError>;

    /// Set `key` to expire `ttl` from now. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Add `member` with `score` to the sorted set at `key`.
    async fn sorted_add(&self, key: &str, score: i64, member: String)
        -> Result<(), BackendError>;

    /// Remove members whose score is strictly below `min_score`.
    /// Returns how many were removed.
    async fn sorted_remove_below(&self, key: &str, min_score: i64)
        -> Result<usize, BackendError>;

    /// Number of members in the sorted set at `key` (0 when absent).
    async fn sorted_len(&self, key: &str) -> Result<usize, BackendError>;
}

//! Storage primitives shared by the job state store, the queue and the event
//! channel.
//!
//! The backend is constructed once and injected; nothing here holds a
//! process-wide client. `RedisBackend` is the production implementation and
//! `MemoryBackend` is the in-process one used by tests and local runs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Outcome of a revision-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The key no longer exists (expired or deleted).
    Missing,
    /// The stored revision differs from the expected one.
    Conflict,
}

/// Key/value, list and pub/sub primitives with TTL support.
///
/// Values written through [`JobBackend::compare_and_swap`] must be JSON
/// objects carrying a string `revision` field; that field is the CAS token.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Unconditional write with expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError>;

    /// Write `value` only if the stored record's `revision` equals
    /// `expected_revision`. The expiry is reset on success.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<CasOutcome, BackendError>;

    /// Seconds until `key` expires. `None` if the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, BackendError>;

    /// Set only if absent. Returns whether the key was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError>;

    /// Delete `key` only if it still holds `value`.
    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool, BackendError>;

    async fn push_back(&self, list: &str, value: &str) -> Result<(), BackendError>;

    async fn pop_front(&self, list: &str) -> Result<Option<String>, BackendError>;

    async fn list_len(&self, list: &str) -> Result<u64, BackendError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError>;

    /// Messages published on `channel` after the subscription is established.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

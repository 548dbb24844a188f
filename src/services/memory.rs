//! In-process implementations of the backend and the entity collaborators.
//!
//! Used by tests and for running the worker without Redis or PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::models::entity::{
    Entity, FailedAttempt, ENTITY_STATUS_VERIFIED, REGISTRATION_STATUS_VERIFIED,
};
use crate::services::backend::{BackendError, CasOutcome, JobBackend};
use crate::services::entity_store::{AuditSink, EntityStore, StoreError};

const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl Inner {
    /// Live entry for `key`; expired entries are evicted on access.
    fn live(&mut self, key: &str) -> Option<&Entry> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get(key)
    }

    /// Writes also sweep expired entries, so keys never read again are reclaimed.
    fn write(&mut self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        self.values.retain(|_, e| e.is_live(now));
        self.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
    }

    fn channel(&mut self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// Single-process [`JobBackend`] with TTLs driven by tokio time.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    ttl_unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as if the server went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only TTL queries fail; reads and writes keep working.
    pub fn set_ttl_unavailable(&self, unavailable: bool) {
        self.ttl_unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn stored_keys(&self) -> usize {
        self.inner.lock().values.len()
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.inner.lock().live(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        self.check()?;
        self.inner.lock().write(key, value, ttl);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<CasOutcome, BackendError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let current = match inner.live(key) {
            Some(entry) => serde_json::from_str::<serde_json::Value>(&entry.value)?,
            None => return Ok(CasOutcome::Missing),
        };
        if current.get("revision").and_then(|r| r.as_str()) != Some(expected_revision) {
            return Ok(CasOutcome::Conflict);
        }
        inner.write(key, value, ttl);
        Ok(CasOutcome::Swapped)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, BackendError> {
        self.check()?;
        if self.ttl_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("TTL queries disabled".to_string()));
        }
        let now = Instant::now();
        Ok(self
            .inner
            .lock()
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.write(key, value, ttl);
        Ok(true)
    }

    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.live(key).is_some_and(|e| e.value == value) {
            inner.values.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<(), BackendError> {
        self.check()?;
        self.inner
            .lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(self.inner.lock().lists.get_mut(list).and_then(|l| l.pop_front()))
    }

    async fn list_len(&self, list: &str) -> Result<u64, BackendError> {
        self.check()?;
        Ok(self.inner.lock().lists.get(list).map_or(0, |l| l.len() as u64))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        self.check()?;
        let sender = self.inner.lock().channel(channel);
        // No subscribers is not an error, same as Redis PUBLISH returning 0.
        let _ = sender.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BackendError> {
        self.check()?;
        let receiver = self.inner.lock().channel(channel).subscribe();
        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check()
    }
}

/// Entity store held in memory, with failure injection.
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: Mutex<HashMap<String, Entity>>,
    failed_attempts: Mutex<Vec<FailedAttempt>>,
    broken_registrations: Mutex<HashSet<String>>,
    lookups_fail: AtomicBool,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        self.entities.lock().insert(entity.id.clone(), entity);
    }

    pub fn entity(&self, entity_id: &str) -> Option<Entity> {
        self.entities.lock().get(entity_id).cloned()
    }

    pub fn failed_attempts(&self) -> Vec<FailedAttempt> {
        self.failed_attempts.lock().clone()
    }

    /// Writes touching this registration will fail.
    pub fn break_registration(&self, registration_id: &str) {
        self.broken_registrations
            .lock()
            .insert(registration_id.to_string());
    }

    pub fn set_lookups_fail(&self, fail: bool) {
        self.lookups_fail.store(fail, Ordering::SeqCst);
    }

    fn check_registration(&self, registration_id: &str) -> Result<(), StoreError> {
        if self.broken_registrations.lock().contains(registration_id) {
            return Err(StoreError::Unavailable(format!(
                "registration {registration_id} is not writable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn find_entity_with_registrations(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
        if self.lookups_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("entity lookups disabled".to_string()));
        }
        Ok(self.entity(entity_id))
    }

    async fn mark_registration_verified(&self, registration_id: &str) -> Result<(), StoreError> {
        self.check_registration(registration_id)?;
        let mut entities = self.entities.lock();
        let registration = entities
            .values_mut()
            .flat_map(|e| e.registrations.iter_mut())
            .find(|r| r.id == registration_id)
            .ok_or_else(|| StoreError::NotFound(registration_id.to_string()))?;
        registration.status = REGISTRATION_STATUS_VERIFIED.to_string();
        Ok(())
    }

    async fn mark_registration_failed(
        &self,
        _entity: &Entity,
        attempt: &FailedAttempt,
    ) -> Result<(), StoreError> {
        self.check_registration(&attempt.registration_id)?;
        self.failed_attempts.lock().push(attempt.clone());
        Ok(())
    }

    async fn mark_entity_verified(&self, entity_id: &str) -> Result<(), StoreError> {
        let mut entities = self.entities.lock();
        let entity = entities
            .get_mut(entity_id)
            .ok_or_else(|| StoreError::NotFound(entity_id.to_string()))?;
        entity.status = ENTITY_STATUS_VERIFIED.to_string();
        entity.verified_at = Some(Utc::now());
        Ok(())
    }
}

/// An audit record captured by [`MemoryAuditSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub event_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
}

#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditRecord>>,
    review_cases: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditRecord> {
        self.events.lock().clone()
    }

    /// `(entity_id, reason)` pairs.
    pub fn review_cases(&self) -> Vec<(String, String)> {
        self.review_cases.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_event(
        &self,
        event_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.events.lock().push(AuditRecord {
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            details,
        });
        Ok(())
    }

    async fn create_manual_review_case(&self, entity_id: &str, reason: &str) -> Result<(), StoreError> {
        self.check()?;
        self.review_cases
            .lock()
            .push((entity_id.to_string(), reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_values_expire_after_ttl() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(backend.ttl("k").await.unwrap(), Some(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.ttl("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_keys() {
        let backend = MemoryBackend::new();
        assert!(backend
            .set_nx_ex("lock:ent-1", "t1", Duration::from_secs(5))
            .await
            .unwrap());
        backend.set_ex("job:ent-1", "{}", Duration::from_secs(5)).await.unwrap();
        assert_eq!(backend.stored_keys(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        backend.set_ex("job:ent-2", "{}", Duration::from_secs(5)).await.unwrap();
        assert_eq!(backend.stored_keys(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_revision() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(
            backend.compare_and_swap("job", "a", "{}", ttl).await.unwrap(),
            CasOutcome::Missing
        );

        backend
            .set_ex("job", r#"{"revision":"a","n":1}"#, ttl)
            .await
            .unwrap();
        assert_eq!(
            backend
                .compare_and_swap("job", "b", r#"{"revision":"c"}"#, ttl)
                .await
                .unwrap(),
            CasOutcome::Conflict
        );
        assert_eq!(
            backend
                .compare_and_swap("job", "a", r#"{"revision":"c"}"#, ttl)
                .await
                .unwrap(),
            CasOutcome::Swapped
        );
        assert_eq!(
            backend.get("job").await.unwrap().as_deref(),
            Some(r#"{"revision":"c"}"#)
        );
    }

    #[tokio::test]
    async fn test_lock_primitives() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(30);
        assert!(backend.set_nx_ex("lock", "t1", ttl).await.unwrap());
        assert!(!backend.set_nx_ex("lock", "t2", ttl).await.unwrap());
        assert!(!backend.delete_if_eq("lock", "t2").await.unwrap());
        assert!(backend.delete_if_eq("lock", "t1").await.unwrap());
        assert!(backend.set_nx_ex("lock", "t2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let backend = MemoryBackend::new();
        backend.push_back("q", "1").await.unwrap();
        backend.push_back("q", "2").await.unwrap();
        assert_eq!(backend.list_len("q").await.unwrap(), 2);
        assert_eq!(backend.pop_front("q").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.pop_front("q").await.unwrap().as_deref(), Some("2"));
        assert_eq!(backend.pop_front("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let backend = MemoryBackend::new();
        let mut events = backend.subscribe("chan").await.unwrap();
        backend.publish("chan", "hello").await.unwrap();
        assert_eq!(events.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.get("k").await,
            Err(BackendError::Unavailable(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::job::VerificationJobState;
use crate::services::backend::{BackendError, JobBackend};
use crate::services::job_state::JobError;
use crate::services::orchestrator::VerificationOrchestrator;

/// Job payload serialized into the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub entity_id: String,
}

/// FIFO, at-least-once queue of entity ids awaiting verification.
///
/// Duplicate entries are not suppressed. Instead, processing takes a per-entity
/// lease so at most one verification runs per entity at a time. A popped
/// entry is never requeued.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn JobBackend>,
    queue_key: String,
    lock_prefix: String,
    lease_ttl: Duration,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn JobBackend>, key_prefix: &str, lease_ttl: Duration) -> Self {
        Self {
            backend,
            queue_key: format!("{key_prefix}:queue"),
            lock_prefix: format!("{key_prefix}:lock"),
            lease_ttl,
        }
    }

    /// Append an entity to the tail of the queue.
    pub async fn enqueue(&self, entity_id: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&QueueEntry {
            entity_id: entity_id.to_string(),
        })?;
        self.backend.push_back(&self.queue_key, &payload).await?;

        metrics::counter!("entity_verification_jobs_enqueued_total").increment(1);
        tracing::info!(entity_id = %entity_id, "Verification job enqueued");
        Ok(())
    }

    /// Pop the entry at the head of the queue.
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>, QueueError> {
        match self.backend.pop_front(&self.queue_key).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Get the current queue depth (pending entries).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let depth = self.backend.list_len(&self.queue_key).await?;
        metrics::gauge!("entity_verification_queue_depth").set(depth as f64);
        Ok(depth)
    }

    /// Check backend connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.backend.ping().await?;
        Ok(())
    }

    /// Pop one entry and verify it under a per-entity lease.
    ///
    /// `Ok(None)` means the queue was empty; no job state is touched. A job
    /// that vanished before processing, or an entity already being verified,
    /// is reported as an error and the entry is dropped.
    pub async fn dequeue_and_process(
        &self,
        orchestrator: &VerificationOrchestrator,
    ) -> Result<Option<VerificationJobState>, JobError> {
        let entry = match self.dequeue().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(QueueError::Backend(e)) => return Err(JobError::Backend(e)),
            Err(QueueError::Serialize(e)) => return Err(JobError::Serialize(e)),
        };
        let entity_id = entry.entity_id;

        tracing::info!(entity_id = %entity_id, "Processing verification job");

        let lease = self.acquire_lease(&entity_id).await?;
        let start = Instant::now();
        let result = orchestrator.verify_entity_registrations(&entity_id).await;
        self.release_lease(&entity_id, lease).await;

        metrics::histogram!("entity_verification_processing_seconds")
            .record(start.elapsed().as_secs_f64());

        match result? {
            Some(state) => Ok(Some(state)),
            None => Err(JobError::JobVanished { entity_id }),
        }
    }

    fn lock_key(&self, entity_id: &str) -> String {
        format!("{}:{}", self.lock_prefix, entity_id)
    }

    async fn acquire_lease(&self, entity_id: &str) -> Result<Uuid, JobError> {
        let token = Uuid::new_v4();
        let acquired = self
            .backend
            .set_nx_ex(&self.lock_key(entity_id), &token.to_string(), self.lease_ttl)
            .await?;

        if !acquired {
            tracing::warn!(entity_id = %entity_id, "Verification already in progress, dropping duplicate entry");
            return Err(JobError::LeaseHeld {
                entity_id: entity_id.to_string(),
            });
        }
        Ok(token)
    }

    /// Best-effort; an unreleased lease expires with its TTL.
    async fn release_lease(&self, entity_id: &str, token: Uuid) {
        match self
            .backend
            .delete_if_eq(&self.lock_key(entity_id), &token.to_string())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(entity_id = %entity_id, "Verification lease expired before release");
            }
            Err(e) => {
                tracing::error!(entity_id = %entity_id, error = %e, "Failed to release verification lease");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

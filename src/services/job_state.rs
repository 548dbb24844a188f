use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::models::event::JobEventType;
use crate::models::job::{JobUpdate, StoredJob, TerminalStateError, VerificationJobState};
use crate::models::verification::JobStatusResponse;
use crate::services::backend::{BackendError, CasOutcome, JobBackend};
use crate::services::events::EventChannel;

/// Default lifetime of a job record; every write resets it.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(300);

/// TTL'd job records keyed by entity id.
///
/// Updates are revision-checked: a write that lost a race with another writer
/// fails with [`JobError::ConcurrentModification`] instead of overwriting it.
#[derive(Clone)]
pub struct JobStateStore {
    backend: Arc<dyn JobBackend>,
    events: EventChannel,
    key_prefix: String,
    ttl: Duration,
}

impl JobStateStore {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        events: EventChannel,
        key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn key(&self, entity_id: &str) -> String {
        format!("{}:{}", self.key_prefix, entity_id)
    }

    async fn load(&self, entity_id: &str) -> Result<Option<StoredJob>, JobError> {
        match self.backend.get(&self.key(entity_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Create a fresh PENDING_VERIFICATION job.
    ///
    /// Not idempotent: an existing job for the same entity is replaced and its
    /// `started_at` reset. Because the replacement carries a new revision, a
    /// run still working on the old job fails its next update with
    /// [`JobError::ConcurrentModification`].
    pub async fn initialize(&self, entity_id: &str) -> Result<VerificationJobState, JobError> {
        let stored = StoredJob::new(VerificationJobState::new(entity_id, Utc::now()));
        let payload = serde_json::to_string(&stored)?;
        self.backend
            .set_ex(&self.key(entity_id), &payload, self.ttl)
            .await?;

        self.events
            .publish(JobEventType::Initialized, &stored.state)
            .await;

        tracing::info!(entity_id = %entity_id, "Verification job initialized");
        Ok(stored.state)
    }

    /// Current job, or `None` if it never existed or has expired.
    pub async fn get(&self, entity_id: &str) -> Result<Option<VerificationJobState>, JobError> {
        Ok(self.load(entity_id).await?.map(|stored| stored.state))
    }

    /// Merge `update` over the stored job and reset its TTL.
    ///
    /// Returns `None` without writing if the job is absent (typically expired
    /// mid-processing). `entity_id` and `started_at` are never changed.
    pub async fn update(
        &self,
        entity_id: &str,
        update: &JobUpdate,
    ) -> Result<Option<VerificationJobState>, JobError> {
        let Some(current) = self.load(entity_id).await? else {
            tracing::warn!(entity_id = %entity_id, "Verification state not found");
            return Ok(None);
        };

        let next = StoredJob::new(current.state.apply(update, Utc::now())?);
        let payload = serde_json::to_string(&next)?;

        let outcome = self
            .backend
            .compare_and_swap(
                &self.key(entity_id),
                &current.revision.to_string(),
                &payload,
                self.ttl,
            )
            .await?;

        match outcome {
            CasOutcome::Swapped => {
                self.events.publish(JobEventType::Updated, &next.state).await;
                Ok(Some(next.state))
            }
            CasOutcome::Missing => {
                tracing::warn!(entity_id = %entity_id, "Verification state expired during update");
                Ok(None)
            }
            CasOutcome::Conflict => Err(JobError::ConcurrentModification {
                entity_id: entity_id.to_string(),
            }),
        }
    }

    /// Current job plus seconds until its record expires.
    pub async fn status_with_expiry(
        &self,
        entity_id: &str,
    ) -> Result<Option<JobStatusResponse>, JobError> {
        let Some(state) = self.get(entity_id).await? else {
            return Ok(None);
        };

        let expires_in = match self.backend.ttl(&self.key(entity_id)).await {
            Ok(ttl) => ttl.unwrap_or(0),
            Err(e) => {
                tracing::warn!(entity_id = %entity_id, error = %e, "Failed to read job TTL");
                self.estimated_expiry(&state)
            }
        };

        Ok(Some(JobStatusResponse { state, expires_in }))
    }

    /// Remaining lifetime measured from `started_at`, used when the backend
    /// cannot report a TTL.
    fn estimated_expiry(&self, state: &VerificationJobState) -> u64 {
        let elapsed = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
        self.ttl.as_secs().saturating_sub(elapsed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job for entity {entity_id} was modified concurrently")]
    ConcurrentModification { entity_id: String },

    #[error(transparent)]
    TerminalState(#[from] TerminalStateError),

    #[error("Job for entity {entity_id} vanished before it could be processed")]
    JobVanished { entity_id: String },

    #[error("Entity {entity_id} is already being verified")]
    LeaseHeld { entity_id: String },
}

use async_trait::async_trait;

use crate::models::entity::{Entity, FailedAttempt};

/// Durable storage for entities and their registrations.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entity with its registrations (in stored order) and licenses.
    async fn find_entity_with_registrations(&self, entity_id: &str) -> Result<Option<Entity>, StoreError>;

    async fn mark_registration_verified(&self, registration_id: &str) -> Result<(), StoreError>;

    /// Record a failed verification attempt for the entity's tenant.
    async fn mark_registration_failed(
        &self,
        entity: &Entity,
        attempt: &FailedAttempt,
    ) -> Result<(), StoreError>;

    /// Set the entity status to VERIFIED with a verification timestamp.
    async fn mark_entity_verified(&self, entity_id: &str) -> Result<(), StoreError>;
}

/// Append-only audit log and manual review case creation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_event(
        &self,
        event_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn create_manual_review_case(&self, entity_id: &str, reason: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

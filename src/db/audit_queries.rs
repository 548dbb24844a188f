use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::event::audit;
use crate::services::entity_store::{AuditSink, StoreError};

const SYSTEM_USER: &str = "system";

/// Audit log in PostgreSQL. Events are attributed to the entity's tenant.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an entity audit event; returns the number of rows written
    /// (0 when the entity does not exist).
    async fn insert(
        &self,
        event_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_events (tenant_id, user_id, type, resource, resource_id, details)
            SELECT tenant_id, $1, $2, 'entity', id, $3
            FROM entities
            WHERE id = $4
            "#,
        )
        .bind(SYSTEM_USER)
        .bind(event_type)
        .bind(details)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record_event(
        &self,
        event_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        if self.insert(event_type, entity_id, details).await? == 0 {
            return Err(StoreError::NotFound(format!("entity {entity_id}")));
        }
        Ok(())
    }

    async fn create_manual_review_case(&self, entity_id: &str, reason: &str) -> Result<(), StoreError> {
        let details = serde_json::json!({ "entityId": entity_id, "reason": reason });
        let written = self
            .insert(audit::MANUAL_REVIEW_CASE_CREATED, entity_id, details)
            .await?;

        if written == 0 {
            tracing::debug!(entity_id = %entity_id, "No entity for manual review case");
        }
        Ok(())
    }
}

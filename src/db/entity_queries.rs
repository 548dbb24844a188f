use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::entity::{
    Entity, FailedAttempt, License, Registration, ENTITY_STATUS_VERIFIED,
    REGISTRATION_STATUS_VERIFIED,
};
use crate::services::entity_store::{EntityStore, StoreError};

/// PostgreSQL-backed [`EntityStore`].
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn find_entity_with_registrations(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, name, country, status, verified_at
            FROM entities
            WHERE id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let registrations = sqlx::query(
            r#"
            SELECT id, type, value, status
            FROM entity_registrations
            WHERE entity_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| -> Result<Registration, sqlx::Error> {
            Ok(Registration {
                id: r.try_get("id")?,
                registration_type: r.try_get("type")?,
                value: r.try_get("value")?,
                status: r.try_get("status")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        let licenses = sqlx::query(
            r#"
            SELECT id, number, authority
            FROM entity_licenses
            WHERE entity_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| -> Result<License, sqlx::Error> {
            Ok(License {
                id: r.try_get("id")?,
                number: r.try_get("number")?,
                authority: r.try_get("authority")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Entity {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            country: row.try_get("country")?,
            status: row.try_get("status")?,
            verified_at: row.try_get("verified_at")?,
            registrations,
            licenses,
        }))
    }

    async fn mark_registration_verified(&self, registration_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE entity_registrations
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(REGISTRATION_STATUS_VERIFIED)
        .bind(registration_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("registration {registration_id}")));
        }
        Ok(())
    }

    async fn mark_registration_failed(
        &self,
        entity: &Entity,
        attempt: &FailedAttempt,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_attempts
                (tenant_id, entity_id, registration_id, type, value, country, status, result)
            VALUES ($1, $2, $3, $4, $5, $6, 'FAILED', $7)
            "#,
        )
        .bind(&entity.tenant_id)
        .bind(&entity.id)
        .bind(&attempt.registration_id)
        .bind(&attempt.registration_type)
        .bind(&attempt.value)
        .bind(&attempt.country)
        .bind(serde_json::json!({ "reason": attempt.reason }))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_entity_verified(&self, entity_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET status = $1, verified_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(ENTITY_STATUS_VERIFIED)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("entity {entity_id}")));
        }
        Ok(())
    }
}

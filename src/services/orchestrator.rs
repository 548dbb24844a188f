use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::models::entity::{Entity, FailedAttempt, Registration};
use crate::models::event::audit;
use crate::models::job::{JobUpdate, VerificationJobState, VerificationJobStatus};
use crate::services::entity_store::{AuditSink, EntityStore, StoreError};
use crate::services::job_state::{JobError, JobStateStore};
use crate::services::registry;

pub const REASON_ENTITY_NOT_FOUND: &str = "Entity not found";
pub const REASON_SERVICE_ERROR: &str = "Verification service error";
pub const REASON_UNEXPECTED: &str = "Unexpected error during verification";

/// Outcome of checking a single registration.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationCheck {
    Verified(String),
    Invalid {
        registration_type: String,
        reason: String,
    },
    ServiceError(String),
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Drives a job from PENDING_VERIFICATION to a terminal state.
pub struct VerificationOrchestrator {
    jobs: JobStateStore,
    entities: Arc<dyn EntityStore>,
    audit: Arc<dyn AuditSink>,
}

impl VerificationOrchestrator {
    pub fn new(jobs: JobStateStore, entities: Arc<dyn EntityStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            jobs,
            entities,
            audit,
        }
    }

    pub fn jobs(&self) -> &JobStateStore {
        &self.jobs
    }

    /// Validate every registration of the entity, in stored order, stopping
    /// at the first failure.
    ///
    /// Returns `Ok(None)` when the job no longer exists. Every other failure
    /// ends in a VERIFICATION_FAILED state, except a lost write race
    /// (`ConcurrentModification` / `TerminalState`), which is returned as an
    /// error so the other writer's state is left alone.
    pub async fn verify_entity_registrations(
        &self,
        entity_id: &str,
    ) -> Result<Option<VerificationJobState>, JobError> {
        let started = self
            .jobs
            .update(
                entity_id,
                &JobUpdate::status(VerificationJobStatus::VerifyingRegistrations),
            )
            .await?;
        let Some(started) = started else {
            tracing::error!(entity_id = %entity_id, "Cannot update state to verifying");
            return Ok(None);
        };

        let result = match self.run(entity_id).await {
            Ok(state) => state,
            Err(RunError::Job(e @ (JobError::ConcurrentModification { .. } | JobError::TerminalState(_)))) => {
                return Err(e);
            }
            Err(e) => {
                tracing::error!(entity_id = %entity_id, error = %e, "Unexpected error in entity verification");
                Some(self.fail_unexpectedly(entity_id, &started).await)
            }
        };

        if let Some(ref state) = result {
            metrics::counter!(
                "entity_verification_jobs_completed_total",
                "status" => state.status.to_string()
            )
            .increment(1);
            tracing::info!(
                entity_id = %entity_id,
                status = %state.status,
                verified_count = state.verified_registrations.len(),
                "Entity verification completed"
            );
        }

        Ok(result)
    }

    async fn run(&self, entity_id: &str) -> Result<Option<VerificationJobState>, RunError> {
        let Some(entity) = self.entities.find_entity_with_registrations(entity_id).await? else {
            tracing::warn!(entity_id = %entity_id, "Entity not found for verification");
            let state = self
                .jobs
                .update(entity_id, &JobUpdate::failed(REASON_ENTITY_NOT_FOUND, Utc::now()))
                .await?;
            return Ok(state);
        };

        let mut verified = Vec::new();
        let mut failure = None;

        for registration in &entity.registrations {
            match self.check_registration(&entity, registration).await {
                RegistrationCheck::Verified(registration_type) => verified.push(registration_type),
                RegistrationCheck::Invalid { reason, .. } | RegistrationCheck::ServiceError(reason) => {
                    failure = Some(reason);
                    break;
                }
            }
        }

        match failure {
            Some(reason) => {
                let update = JobUpdate::failed(reason.clone(), Utc::now())
                    .with_verified_registrations(verified);
                let state = self.jobs.update(entity_id, &update).await?;

                self.record_audit(
                    audit::VERIFICATION_FAILED,
                    &entity,
                    json!({ "entityId": entity_id, "reason": reason }),
                )
                .await;
                Ok(state)
            }
            None => {
                self.entities.mark_entity_verified(entity_id).await?;

                let update = JobUpdate::succeeded(verified.clone(), Utc::now());
                let state = self.jobs.update(entity_id, &update).await?;

                self.record_audit(
                    audit::VERIFICATION_SUCCESS,
                    &entity,
                    json!({ "entityId": entity_id, "verifiedRegistrations": verified }),
                )
                .await;
                Ok(state)
            }
        }
    }

    /// Validate one registration and record the outcome in the entity store.
    pub async fn check_registration(&self, entity: &Entity, registration: &Registration) -> RegistrationCheck {
        let registration_type = &registration.registration_type;

        // Only validators with a checksum can vouch for a registration.
        let accepted = registry::find_validator(&entity.country, registration_type)
            .is_some_and(|v| v.has_checksum() && v.validate(&registration.value));

        if accepted {
            return match self.entities.mark_registration_verified(&registration.id).await {
                Ok(()) => {
                    tracing::debug!(
                        entity_id = %entity.id,
                        registration_type = %registration_type,
                        "Registration verified"
                    );
                    RegistrationCheck::Verified(registration_type.clone())
                }
                Err(e) => self.service_error(entity, registration, e),
            };
        }

        let reason = format!("Invalid {registration_type} format");
        let attempt = FailedAttempt {
            registration_id: registration.id.clone(),
            country: entity.country.clone(),
            registration_type: registration_type.clone(),
            value: registration.value.clone(),
            reason: reason.clone(),
        };

        match self.entities.mark_registration_failed(entity, &attempt).await {
            Ok(()) => {
                tracing::info!(
                    entity_id = %entity.id,
                    registration_type = %registration_type,
                    "Registration failed validation"
                );
                RegistrationCheck::Invalid {
                    registration_type: registration_type.clone(),
                    reason,
                }
            }
            Err(e) => self.service_error(entity, registration, e),
        }
    }

    fn service_error(&self, entity: &Entity, registration: &Registration, error: StoreError) -> RegistrationCheck {
        tracing::error!(
            entity_id = %entity.id,
            registration_type = %registration.registration_type,
            error = %error,
            "Error verifying registration"
        );
        RegistrationCheck::ServiceError(REASON_SERVICE_ERROR.to_string())
    }

    /// Persist the unexpected-error failure if possible; otherwise return the
    /// failed state built from the last known one.
    async fn fail_unexpectedly(&self, entity_id: &str, last_known: &VerificationJobState) -> VerificationJobState {
        let update = JobUpdate::failed(REASON_UNEXPECTED, Utc::now());
        match self.jobs.update(entity_id, &update).await {
            Ok(Some(state)) => return state,
            Ok(None) => {
                tracing::warn!(entity_id = %entity_id, "Job vanished while recording failure");
            }
            Err(e) => {
                tracing::error!(entity_id = %entity_id, error = %e, "Failed to record verification failure");
            }
        }

        let mut failed = last_known.clone();
        failed.status = VerificationJobStatus::VerificationFailed;
        failed.failure_reason = Some(REASON_UNEXPECTED.to_string());
        failed.completed_at = update.completed_at;
        failed
    }

    /// Escalate a non-terminal job to MANUAL_REVIEW and open a review case.
    ///
    /// Review case creation is best-effort; its failure does not undo the
    /// transition.
    pub async fn mark_for_manual_review(
        &self,
        entity_id: &str,
        reason: &str,
    ) -> Result<Option<VerificationJobState>, JobError> {
        let state = self
            .jobs
            .update(entity_id, &JobUpdate::manual_review(reason, Utc::now()))
            .await?;

        if state.is_some() {
            match self.audit.create_manual_review_case(entity_id, reason).await {
                Ok(()) => {
                    tracing::info!(entity_id = %entity_id, reason = %reason, "Manual review case created for entity");
                }
                Err(e) => {
                    tracing::error!(entity_id = %entity_id, error = %e, "Error creating manual review case");
                }
            }
        }

        Ok(state)
    }

    async fn record_audit(&self, event_type: &str, entity: &Entity, details: serde_json::Value) {
        if let Err(e) = self.audit.record_event(event_type, &entity.id, details).await {
            tracing::error!(
                entity_id = %entity.id,
                event_type = %event_type,
                error = %e,
                "Failed to record audit event"
            );
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Maximum retries recorded on every job. Not driven by any transition yet.
pub const MAX_RETRIES: u32 = 3;

/// Status of an entity verification job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationJobStatus {
    PendingVerification,
    /// Reserved; no transition enters this state.
    VerifyingLicense,
    VerifyingRegistrations,
    VerifiedSuccess,
    VerificationFailed,
    ManualReview,
}

impl VerificationJobStatus {
    /// Terminal states are sinks: a new attempt needs a fresh job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::VerifiedSuccess | Self::VerificationFailed | Self::ManualReview
        )
    }

    /// Whether a failure reason may accompany this status.
    pub fn carries_failure_reason(&self) -> bool {
        matches!(self, Self::VerificationFailed | Self::ManualReview)
    }
}

/// The unit of orchestration, persisted per entity id with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJobState {
    pub entity_id: String,
    pub status: VerificationJobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified_registrations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl VerificationJobState {
    pub fn new(entity_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: VerificationJobStatus::PendingVerification,
            started_at: now,
            completed_at: None,
            verified_registrations: Vec::new(),
            failure_reason: None,
            retry_count: 0,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Merge `update` over this state.
    ///
    /// `entity_id` and `started_at` are always kept from `self`. Once the job
    /// has completed, only an empty update is accepted.
    pub fn apply(&self, update: &JobUpdate, now: DateTime<Utc>) -> Result<Self, TerminalStateError> {
        if self.is_completed() && !update.is_empty() {
            return Err(TerminalStateError {
                entity_id: self.entity_id.clone(),
                status: self.status,
            });
        }

        let mut next = self.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(completed_at) = update.completed_at {
            next.completed_at = Some(completed_at);
        }
        if let Some(ref registrations) = update.verified_registrations {
            next.verified_registrations = registrations.clone();
        }
        if let Some(ref reason) = update.failure_reason {
            next.failure_reason = Some(reason.clone());
        }
        if let Some(retry_count) = update.retry_count {
            next.retry_count = retry_count;
        }

        if next.status.is_terminal() {
            next.completed_at.get_or_insert(now);
        } else {
            next.completed_at = None;
        }
        if !next.status.carries_failure_reason() {
            next.failure_reason = None;
        }

        Ok(next)
    }
}

/// Partial update merged over a stored job.
///
/// `entity_id` and `started_at` are accepted so callers can round-trip a full
/// state, but they never overwrite the stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VerificationJobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_registrations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl JobUpdate {
    pub fn status(status: VerificationJobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn succeeded(verified_registrations: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(VerificationJobStatus::VerifiedSuccess),
            completed_at: Some(now),
            verified_registrations: Some(verified_registrations),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(VerificationJobStatus::VerificationFailed),
            completed_at: Some(now),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn manual_review(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(VerificationJobStatus::ManualReview),
            completed_at: Some(now),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_verified_registrations(mut self, registrations: Vec<String>) -> Self {
        self.verified_registrations = Some(registrations);
        self
    }

    /// True when the update would change no mutable field.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.completed_at.is_none()
            && self.verified_registrations.is_none()
            && self.failure_reason.is_none()
            && self.retry_count.is_none()
    }
}

/// Persisted envelope. `revision` changes on every write and is the
/// compare-and-swap token for updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredJob {
    pub revision: Uuid,
    pub state: VerificationJobState,
}

impl StoredJob {
    pub fn new(state: VerificationJobState) -> Self {
        Self {
            revision: Uuid::new_v4(),
            state,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Job for entity {entity_id} is already {status}")]
pub struct TerminalStateError {
    pub entity_id: String,
    pub status: VerificationJobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending() -> VerificationJobState {
        VerificationJobState::new("ent-1", Utc::now() - Duration::seconds(10))
    }

    #[test]
    fn test_new_job_defaults() {
        let job = pending();
        assert_eq!(job.status, VerificationJobStatus::PendingVerification);
        assert!(job.verified_registrations.is_empty());
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_apply_pins_identity_fields() {
        let job = pending();
        let update = JobUpdate {
            entity_id: Some("someone-else".to_string()),
            started_at: Some(Utc::now() + Duration::days(1)),
            status: Some(VerificationJobStatus::VerifyingRegistrations),
            ..Default::default()
        };

        let next = job.apply(&update, Utc::now()).unwrap();
        assert_eq!(next.entity_id, "ent-1");
        assert_eq!(next.started_at, job.started_at);
        assert_eq!(next.status, VerificationJobStatus::VerifyingRegistrations);
    }

    #[test]
    fn test_terminal_status_sets_completed_at() {
        let now = Utc::now();
        let update = JobUpdate::status(VerificationJobStatus::VerifiedSuccess);
        let next = pending().apply(&update, now).unwrap();
        assert_eq!(next.completed_at, Some(now));
    }

    #[test]
    fn test_non_terminal_status_clears_completed_at_and_reason() {
        let update = JobUpdate {
            status: Some(VerificationJobStatus::VerifyingRegistrations),
            completed_at: Some(Utc::now()),
            failure_reason: Some("nope".to_string()),
            ..Default::default()
        };
        let next = pending().apply(&update, Utc::now()).unwrap();
        assert!(next.completed_at.is_none());
        assert!(next.failure_reason.is_none());
    }

    #[test]
    fn test_completed_job_rejects_changes() {
        let done = pending()
            .apply(&JobUpdate::failed("Entity not found", Utc::now()), Utc::now())
            .unwrap();

        let err = done
            .apply(&JobUpdate::status(VerificationJobStatus::ManualReview), Utc::now())
            .unwrap_err();
        assert_eq!(err.status, VerificationJobStatus::VerificationFailed);

        let refreshed = done.apply(&JobUpdate::default(), Utc::now()).unwrap();
        assert_eq!(refreshed, done);
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&VerificationJobStatus::VerifyingRegistrations).unwrap();
        assert_eq!(json, "\"VERIFYING_REGISTRATIONS\"");
        assert_eq!(
            "MANUAL_REVIEW".parse::<VerificationJobStatus>().unwrap(),
            VerificationJobStatus::ManualReview
        );
    }

    #[test]
    fn test_state_uses_camel_case_fields() {
        let value = serde_json::to_value(pending()).unwrap();
        assert!(value.get("entityId").is_some());
        assert!(value.get("verifiedRegistrations").is_some());
        assert!(value.get("completedAt").is_none());
    }
}

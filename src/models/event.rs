use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::VerificationJobState;

/// Lifecycle transitions broadcast on the event channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum JobEventType {
    #[serde(rename = "job.initialized")]
    #[strum(serialize = "job.initialized")]
    Initialized,
    #[serde(rename = "job.updated")]
    #[strum(serialize = "job.updated")]
    Updated,
}

/// Wire form: `{type, timestamp, ...state}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: JobEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub state: VerificationJobState,
}

impl JobEvent {
    pub fn new(event_type: JobEventType, state: VerificationJobState) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            state,
        }
    }
}

/// Audit event types written by the orchestrator.
pub mod audit {
    pub const VERIFICATION_SUCCESS: &str = "entity.setup.verification.success";
    pub const VERIFICATION_FAILED: &str = "entity.setup.verification.failed";
    pub const MANUAL_REVIEW_CASE_CREATED: &str = "entity.manual_review_case_created";
}

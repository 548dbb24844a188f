use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::VerificationJobState;

/// Request to escalate a job to manual review.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualReviewRequest {
    #[garde(length(min = 1, max = 500))]
    pub reason: String,
}

/// Response for status polling: the job plus seconds until its record expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub state: VerificationJobState,
    pub expires_in: u64,
}

/// Aggregate result of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: u32,
    pub failed: u32,
}

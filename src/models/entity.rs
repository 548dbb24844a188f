use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A business entity with the registrations that must be verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// ISO 3166-1 alpha-2 country code, e.g. "AE".
    pub country: String,
    pub status: String,
    pub verified_at: Option<DateTime<Utc>>,
    /// In stored order; verification walks them in this order.
    pub registrations: Vec<Registration>,
    pub licenses: Vec<License>,
}

/// A country-specific identifier attached to an entity (e.g. a TRN).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    #[serde(rename = "type")]
    pub registration_type: String,
    pub value: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub number: String,
    pub authority: Option<String>,
}

/// A failed verification attempt recorded against the entity's tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub registration_id: String,
    pub country: String,
    pub registration_type: String,
    pub value: String,
    pub reason: String,
}

pub const ENTITY_STATUS_VERIFIED: &str = "VERIFIED";
pub const REGISTRATION_STATUS_VERIFIED: &str = "VERIFIED";
pub const REGISTRATION_STATUS_PENDING: &str = "PENDING";

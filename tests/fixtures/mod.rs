//! Sample entities covering each supported jurisdiction

/// An entity fixture and the outcome its verification should reach.
#[derive(Debug, Clone)]
pub struct EntityFixture {
    pub entity_id: &'static str,
    pub country: &'static str,
    pub registrations: &'static [(&'static str, &'static str)],
    pub should_verify: bool,
    pub expected_verified: &'static [&'static str],
    pub expected_reason: Option<&'static str>,
}

pub const ENTITY_FIXTURES: &[EntityFixture] = &[
    EntityFixture {
        entity_id: "ae-valid-trn",
        country: "AE",
        registrations: &[("TRN", "100067144000097")],
        should_verify: true,
        expected_verified: &["TRN"],
        expected_reason: None,
    },
    EntityFixture {
        entity_id: "ae-invalid-trn",
        country: "AE",
        registrations: &[("TRN", "INVALID")],
        should_verify: false,
        expected_verified: &[],
        expected_reason: Some("Invalid TRN format"),
    },
    EntityFixture {
        entity_id: "sa-cr",
        country: "SA",
        registrations: &[("CR", "1010010101")],
        should_verify: true,
        expected_verified: &["CR"],
        expected_reason: None,
    },
    EntityFixture {
        entity_id: "eg-tin-then-bad",
        country: "EG",
        registrations: &[("TIN", "123456789"), ("TIN", "12345")],
        should_verify: false,
        expected_verified: &["TIN"],
        expected_reason: Some("Invalid TIN format"),
    },
    EntityFixture {
        entity_id: "ae-license-only",
        country: "AE",
        registrations: &[("LICENSE", "P123456Q")],
        should_verify: false,
        expected_verified: &[],
        expected_reason: Some("Invalid LICENSE format"),
    },
    EntityFixture {
        entity_id: "us-unsupported",
        country: "US",
        registrations: &[("EIN", "12-3456789")],
        should_verify: false,
        expected_verified: &[],
        expected_reason: Some("Invalid EIN format"),
    },
];

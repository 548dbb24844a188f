//! Country identifier registry.
//!
//! Format rules for registration identifiers (tax numbers, commercial
//! registrations, licenses) in the supported jurisdictions: UAE, KSA, Egypt.

use regex::Regex;
use std::sync::LazyLock;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum CountryCode {
    #[strum(serialize = "AE")]
    Uae,
    #[strum(serialize = "SA")]
    Ksa,
    #[strum(serialize = "EG")]
    Egypt,
}

/// Format rule for one identifier type in one country.
pub struct IdentifierValidator {
    pub id_type: &'static str,
    pub country: CountryCode,
    pub pattern: Regex,
    pub length: Option<usize>,
    /// Only validators with a checksum can verify a registration.
    pub checksum: Option<fn(&str) -> bool>,
}

impl IdentifierValidator {
    pub fn has_checksum(&self) -> bool {
        self.checksum.is_some()
    }

    /// Pattern, length and checksum (if any) must all pass.
    pub fn validate(&self, value: &str) -> bool {
        if !self.pattern.is_match(value) {
            return false;
        }
        if self.length.is_some_and(|len| value.chars().count() != len) {
            return false;
        }
        self.checksum.map_or(true, |checksum| checksum(value))
    }
}

fn all_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

// Format-only checks; authoritative checksums need registry access.

/// UAE TRN: 15 digits.
fn trn_checksum(value: &str) -> bool {
    all_digits(value, 15)
}

/// KSA commercial registration: 10 digits.
fn cr_checksum(value: &str) -> bool {
    all_digits(value, 10)
}

/// Egyptian tax identification number: 9 digits.
fn egypt_tin_checksum(value: &str) -> bool {
    all_digits(value, 9)
}

fn validator(
    country: CountryCode,
    id_type: &'static str,
    pattern: &str,
    length: usize,
    checksum: Option<fn(&str) -> bool>,
) -> IdentifierValidator {
    IdentifierValidator {
        id_type,
        country,
        // Patterns are literals below.
        pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid {id_type} pattern: {e}")),
        length: Some(length),
        checksum,
    }
}

static VALIDATORS: LazyLock<Vec<IdentifierValidator>> = LazyLock::new(|| {
    vec![
        // ── UAE ──────────────────────────────────────────────────────────
        validator(CountryCode::Uae, "TRN", r"^[0-9]{15}$", 15, Some(trn_checksum)),
        validator(CountryCode::Uae, "LICENSE", r"^[A-Z][0-9]{6}[A-Z]$", 8, None),
        // ── KSA ──────────────────────────────────────────────────────────
        validator(CountryCode::Ksa, "CR", r"^[0-9]{10}$", 10, Some(cr_checksum)),
        validator(CountryCode::Ksa, "VAT", r"^[0-9]{15}$", 15, None),
        // ── Egypt ────────────────────────────────────────────────────────
        validator(CountryCode::Egypt, "TIN", r"^[0-9]{9}$", 9, Some(egypt_tin_checksum)),
        validator(CountryCode::Egypt, "ETA_ID", r"^[0-9]{15}$", 15, None),
    ]
});

/// All validators registered for a country.
pub fn validators_for(country: CountryCode) -> impl Iterator<Item = &'static IdentifierValidator> {
    VALIDATORS.iter().filter(move |v| v.country == country)
}

/// Validator for `(country, id_type)`. Unknown country codes resolve to none.
pub fn find_validator(country: &str, id_type: &str) -> Option<&'static IdentifierValidator> {
    let country: CountryCode = country.parse().ok()?;
    validators_for(country).find(|v| v.id_type == id_type)
}

/// Whether `value` is a well-formed `id_type` identifier for `country`.
pub fn validate_identifier(country: &str, id_type: &str, value: &str) -> bool {
    find_validator(country, id_type).is_some_and(|v| v.validate(value))
}

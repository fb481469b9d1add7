//! Typed records for the ownership graph.
//!
//! Rows coming out of a graph store are converted into these records at the
//! adapter boundary; the rest of the engine never sees loosely-typed data.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KycError, Result};

/// Registration status of a legal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Active,
    Inactive,
    Merged,
    Unknown,
}

impl EntityStatus {
    /// Lenient parse; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => EntityStatus::Active,
            "INACTIVE" => EntityStatus::Inactive,
            "MERGED" => EntityStatus::Merged,
            _ => EntityStatus::Unknown,
        }
    }
}

/// Status of an ownership relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipStatus {
    Active,
    Inactive,
    Unknown,
}

impl RelationshipStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => RelationshipStatus::Active,
            "INACTIVE" => RelationshipStatus::Inactive,
            _ => RelationshipStatus::Unknown,
        }
    }
}

/// A legal entity node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub lei: String,
    pub legal_name: String,
    /// ISO-3166 alpha-2 code, `None` when absent or malformed in the store.
    pub jurisdiction: Option<String>,
    pub status: EntityStatus,
    pub beneficial_owner_known: bool,
}

/// Directed ownership edge: `parent_lei` owns `ownership_percentage` of `child_lei`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipEdge {
    pub parent_lei: String,
    pub child_lei: String,
    pub ownership_percentage: f64,
    pub relationship_status: RelationshipStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub provenance: Option<String>,
}

impl OwnershipEdge {
    /// An edge without an end date that has not been marked inactive.
    pub fn is_active(&self) -> bool {
        self.end_date.is_none() && self.relationship_status != RelationshipStatus::Inactive
    }

    /// The endpoint opposite to `lei`.
    pub fn other_end(&self, lei: &str) -> &str {
        if self.parent_lei == lei {
            &self.child_lei
        } else {
            &self.parent_lei
        }
    }
}

/// Negative news record linked to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdverseMediaRecord {
    pub media_id: String,
    pub lei: String,
    pub title: String,
    pub source: Option<String>,
    pub published_on: Option<NaiveDate>,
}

/// Caller-supplied set of high-risk jurisdiction codes.
///
/// Codes are trimmed and upper-cased; the set is ordered so that anything
/// serialized from it is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCountrySet(BTreeSet<String>);

impl RiskCountrySet {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    /// Parse a comma separated list such as `"IR, kp,SY"`.
    pub fn parse_list(raw: &str) -> Result<Self> {
        let set = Self::new(raw.split(','));
        if let Some(bad) = set.0.iter().find(|c| !is_country_code(c)) {
            return Err(KycError::InvalidInput(format!(
                "not an ISO-3166 alpha-2 code: {}",
                bad
            )));
        }
        Ok(set)
    }

    pub fn contains(&self, jurisdiction: &str) -> bool {
        self.0.contains(jurisdiction)
    }

    /// Whether an optional jurisdiction is in the set.
    pub fn flags(&self, jurisdiction: Option<&str>) -> bool {
        jurisdiction.map_or(false, |j| self.contains(j))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl fmt::Display for RiskCountrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "{}", codes.join(","))
    }
}

fn lei_regex() -> &'static Regex {
    static LEI: OnceLock<Regex> = OnceLock::new();
    LEI.get_or_init(|| Regex::new(r"^[A-Z0-9]{18}[0-9]{2}$").expect("Invalid regex pattern"))
}

fn country_regex() -> &'static Regex {
    static COUNTRY: OnceLock<Regex> = OnceLock::new();
    COUNTRY.get_or_init(|| Regex::new(r"^[A-Z]{2}$").expect("Invalid regex pattern"))
}

/// Whether `lei` has the canonical 20-character LEI shape.
pub fn is_canonical_lei(lei: &str) -> bool {
    lei_regex().is_match(lei)
}

/// ISO 17442 check digits (ISO 7064 MOD 97-10): letters map to 10..35 and the
/// resulting number must be 1 modulo 97.
pub fn lei_checksum_valid(lei: &str) -> bool {
    if !is_canonical_lei(lei) {
        return false;
    }
    let mut remainder: u32 = 0;
    for c in lei.chars() {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        // Two-digit values shift the remainder by 100, single digits by 10.
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}

/// Whether `code` is an upper-case ISO-3166 alpha-2 shape.
pub fn is_country_code(code: &str) -> bool {
    country_regex().is_match(code)
}

/// Normalise a caller-supplied identifier.
///
/// Identifiers are opaque: non-canonical values are accepted, only empty ones
/// are rejected.
pub fn normalize_lei(raw: &str) -> Result<String> {
    let lei = raw.trim();
    if lei.is_empty() {
        return Err(KycError::InvalidInput("entity identifier must not be empty".to_string()));
    }
    if !is_canonical_lei(lei) {
        log::debug!("Non-canonical entity identifier: {}", lei);
    }
    Ok(lei.to_string())
}

/// Validate an ownership percentage read from the store.
pub fn validate_percentage(value: Option<f64>, parent: &str, child: &str) -> Result<f64> {
    match value {
        Some(p) if p.is_finite() && (0.0..=100.0).contains(&p) => Ok(p),
        Some(p) => Err(KycError::SchemaViolation(format!(
            "ownership percentage {} out of range on edge {} -> {}",
            p, parent, child
        ))),
        None => Err(KycError::SchemaViolation(format!(
            "missing ownership percentage on edge {} -> {}",
            parent, child
        ))),
    }
}

/// Check a caller-supplied ownership threshold, in percent.
pub fn validate_threshold(threshold: f64) -> Result<f64> {
    if threshold.is_finite() && (0.0..=100.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(KycError::InvalidThreshold(threshold))
    }
}

/// Normalise a stored jurisdiction code; malformed codes become `None`.
pub fn normalize_jurisdiction(raw: Option<String>, lei: &str) -> Option<String> {
    let code = raw?.trim().to_ascii_uppercase();
    if code.is_empty() {
        return None;
    }
    if is_country_code(&code) {
        Some(code)
    } else {
        log::warn!("Schema violation: malformed jurisdiction {:?} on entity {}", code, lei);
        None
    }
}

/// Parse a stored `YYYY-MM-DD` date; malformed values become `None`.
pub fn parse_date(raw: Option<String>, context: &str) -> Option<NaiveDate> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Timestamps such as 2021-03-04T00:00:00Z carry the date in the first 10 chars.
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            log::warn!("Schema violation: malformed date {:?} on {}", trimmed, context);
            None
        }
    }
}

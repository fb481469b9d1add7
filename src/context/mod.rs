//! The structured KYC context record handed to downstream reasoning.
//!
//! A [`KycContext`] carries no timestamps or generated identifiers: the same
//! parameters against the same graph snapshot always serialize to the same
//! bytes, which is what [`KycContext::digest`] relies on.

mod assembler;

pub use assembler::{BatchItem, ContextAssembler};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::graph::{DirectParent, OwnershipPath, PathNode};
use crate::model::{AdverseMediaRecord, Entity, RiskCountrySet};
use crate::risk::{ComplexityScore, JurisdictionRisk};
use crate::{KycError, Result};

/// A sub-result that is either present or explicitly unavailable.
///
/// Serialized as `{"status":"available","value":..}` or
/// `{"status":"unavailable","reason":".."}` so that "no data" and
/// "data could not be fetched" never look alike.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Available { value: T },
    Unavailable { reason: String },
}

impl<T> Section<T> {
    /// Wrap a component outcome, logging failures against `name`.
    pub fn from_result(name: &str, result: Result<T>) -> Self {
        match result {
            Ok(value) => Section::Available { value },
            Err(e) => {
                log::warn!("{} unavailable: {}", name, e);
                Section::Unavailable { reason: e.to_string() }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Section::Available { value } => Some(value),
            Section::Unavailable { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Section<U> {
        match self {
            Section::Available { value } => Section::Available { value: f(value) },
            Section::Unavailable { reason } => Section::Unavailable { reason },
        }
    }
}

/// Effective parameters of one assembly, echoed in the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextParams {
    pub threshold_percent: f64,
    pub max_depth: usize,
    pub top_k: usize,
    pub risk_countries: RiskCountrySet,
    pub media_limit: usize,
}

impl ContextParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold_percent: config.traversal.default_threshold,
            max_depth: config.traversal.max_depth,
            top_k: config.traversal.top_k,
            risk_countries: RiskCountrySet::new(&config.jurisdiction.risk_countries),
            media_limit: config.adverse_media.default_limit,
        }
    }
}

/// Ranked chains plus traversal bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipChains {
    pub paths: Vec<OwnershipPath>,
    pub paths_explored: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KycContext {
    pub entity: Entity,
    pub parameters: ContextParams,
    pub direct_parents: Section<Vec<DirectParent>>,
    pub ultimate_parent: Section<Option<PathNode>>,
    pub ownership_chains: Section<OwnershipChains>,
    pub jurisdiction_risk: Section<JurisdictionRisk>,
    pub complexity: Section<ComplexityScore>,
    pub adverse_media: Section<Vec<AdverseMediaRecord>>,
}

impl KycContext {
    /// Sections that could not be produced.
    pub fn unavailable_sections(&self) -> Vec<&'static str> {
        [
            ("direct_parents", self.direct_parents.is_available()),
            ("ultimate_parent", self.ultimate_parent.is_available()),
            ("ownership_chains", self.ownership_chains.is_available()),
            ("jurisdiction_risk", self.jurisdiction_risk.is_available()),
            ("complexity", self.complexity.is_available()),
            ("adverse_media", self.adverse_media.is_available()),
        ]
        .into_iter()
        .filter(|(_, available)| !available)
        .map(|(name, _)| name)
        .collect()
    }

    /// Hex SHA-256 of the JSON encoding.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).map_err(KycError::Serialization)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

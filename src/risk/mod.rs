//! Risk signals derived from the ownership graph.

mod complexity;
mod jurisdiction;

pub use complexity::{ComplexityScore, ComplexityScorer};
pub use jurisdiction::{FlaggedNeighbor, JurisdictionRisk, JurisdictionRiskScorer};

use std::fmt;

use serde::Serialize;

/// Ordered risk tier; later variants are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_and_wire_form() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::High < RiskTier::Critical);
        assert_eq!(serde_json::to_string(&RiskTier::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(RiskTier::Medium.to_string(), "MEDIUM");
    }
}

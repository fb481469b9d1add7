use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::RiskTier;
use crate::config::JurisdictionConfig;
use crate::graph::OwnershipChainTraversal;
use crate::model::{normalize_lei, validate_threshold, RiskCountrySet};
use crate::store::{GraphStore, Neighborhood};
use crate::{KycError, Result};

/// A neighbor located in a risk jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedNeighbor {
    pub lei: String,
    pub legal_name: String,
    pub jurisdiction: String,
    pub hops: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JurisdictionRisk {
    pub tier: RiskTier,
    /// Number of flagged neighbors.
    pub exposure_count: usize,
    pub flagged_neighbors: Vec<FlaggedNeighbor>,
    pub entity_jurisdiction: Option<String>,
    pub ultimate_parent_lei: Option<String>,
    pub ultimate_parent_jurisdiction: Option<String>,
    /// Distinct jurisdictions of the entity and its neighbors, sorted.
    pub jurisdictions: Vec<String>,
    pub neighbor_radius: usize,
}

/// Scores exposure to risk jurisdictions around an entity.
#[derive(Clone)]
pub struct JurisdictionRiskScorer {
    store: Arc<dyn GraphStore>,
    traversal: OwnershipChainTraversal,
    config: JurisdictionConfig,
}

impl JurisdictionRiskScorer {
    pub fn new(store: Arc<dyn GraphStore>, traversal: OwnershipChainTraversal, config: JurisdictionConfig) -> Self {
        Self {
            store,
            traversal,
            config,
        }
    }

    /// Risk countries from configuration.
    pub fn configured_risk_countries(&self) -> RiskCountrySet {
        RiskCountrySet::new(&self.config.risk_countries)
    }

    /// Score using the traversal's default threshold to find the ultimate parent.
    pub async fn score(&self, entity_id: &str, risk_countries: &RiskCountrySet) -> Result<JurisdictionRisk> {
        let threshold = self.traversal.config().default_threshold;
        self.score_at_threshold(entity_id, risk_countries, threshold).await
    }

    pub async fn score_at_threshold(
        &self,
        entity_id: &str,
        risk_countries: &RiskCountrySet,
        threshold_percent: f64,
    ) -> Result<JurisdictionRisk> {
        let threshold = validate_threshold(threshold_percent)?;
        let lei = normalize_lei(entity_id)?;

        let entity = self
            .store
            .entity(&lei)
            .await?
            .ok_or_else(|| KycError::EntityNotFound(lei.clone()))?;

        let max_depth = self.traversal.config().max_depth;
        let (neighborhood, chain) = tokio::try_join!(
            self.store.neighborhood(&lei, self.config.neighbor_radius),
            self.traversal.traverse(&lei, threshold, max_depth, 1),
        )?;

        let ultimate_parent = chain.ultimate_parent;
        let parent_jurisdiction = ultimate_parent.as_ref().and_then(|p| p.jurisdiction.clone());

        let tier = classify(
            entity.jurisdiction.as_deref(),
            parent_jurisdiction.as_deref(),
            &neighborhood,
            risk_countries,
        );

        let flagged_neighbors: Vec<FlaggedNeighbor> = neighborhood
            .nodes
            .iter()
            .filter_map(|n| {
                let code = n.entity.jurisdiction.as_deref()?;
                risk_countries.contains(code).then(|| FlaggedNeighbor {
                    lei: n.entity.lei.clone(),
                    legal_name: n.entity.legal_name.clone(),
                    jurisdiction: code.to_string(),
                    hops: n.hops,
                })
            })
            .collect();

        let jurisdictions: BTreeSet<String> = entity
            .jurisdiction
            .iter()
            .chain(neighborhood.nodes.iter().filter_map(|n| n.entity.jurisdiction.as_ref()))
            .cloned()
            .collect();

        log::debug!(
            "Jurisdiction risk for {}: {} ({} flagged neighbors)",
            lei,
            tier,
            flagged_neighbors.len()
        );

        Ok(JurisdictionRisk {
            tier,
            exposure_count: flagged_neighbors.len(),
            flagged_neighbors,
            entity_jurisdiction: entity.jurisdiction,
            ultimate_parent_lei: ultimate_parent.map(|p| p.lei),
            ultimate_parent_jurisdiction: parent_jurisdiction,
            jurisdictions: jurisdictions.into_iter().collect(),
            neighbor_radius: self.config.neighbor_radius,
        })
    }
}

/// Tier rule, first match wins:
/// CRITICAL when a direct neighbor is flagged and so is the entity or its
/// ultimate parent; HIGH when any neighbor is flagged; MEDIUM when the entity
/// and its neighbors span more than one jurisdiction; LOW otherwise.
pub fn classify(
    entity_jurisdiction: Option<&str>,
    ultimate_parent_jurisdiction: Option<&str>,
    neighborhood: &Neighborhood,
    risk_countries: &RiskCountrySet,
) -> RiskTier {
    let flagged = |code: Option<&str>| risk_countries.flags(code);

    let direct_flagged = neighborhood
        .direct()
        .any(|n| flagged(n.entity.jurisdiction.as_deref()));
    let any_flagged = neighborhood
        .nodes
        .iter()
        .any(|n| flagged(n.entity.jurisdiction.as_deref()));
    let self_or_parent_flagged = flagged(entity_jurisdiction) || flagged(ultimate_parent_jurisdiction);

    if direct_flagged && self_or_parent_flagged {
        return RiskTier::Critical;
    }
    if any_flagged {
        return RiskTier::High;
    }

    let distinct: BTreeSet<&str> = entity_jurisdiction
        .into_iter()
        .chain(neighborhood.nodes.iter().filter_map(|n| n.entity.jurisdiction.as_deref()))
        .collect();
    if distinct.len() > 1 {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraversalConfig;
    use crate::testing::TestGraph;

    fn scorer(graph: &TestGraph, radius: usize) -> JurisdictionRiskScorer {
        let store = graph.store();
        let traversal = OwnershipChainTraversal::new(store.clone(), TraversalConfig::default());
        JurisdictionRiskScorer::new(
            store,
            traversal,
            JurisdictionConfig {
                neighbor_radius: radius,
                ..JurisdictionConfig::default()
            },
        )
    }

    fn risk(codes: &[&str]) -> RiskCountrySet {
        RiskCountrySet::new(codes.iter().copied())
    }

    #[tokio::test]
    async fn test_low_single_jurisdiction() {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("B", Some("GB"))
            .edge("B", "A", 60.0);

        let result = scorer(&graph, 1).score("A", &risk(&["IR"])).await.unwrap();
        assert_eq!(result.tier, RiskTier::Low);
        assert_eq!(result.exposure_count, 0);
        assert_eq!(result.jurisdictions, vec!["GB"]);
    }

    #[tokio::test]
    async fn test_medium_multiple_jurisdictions() {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("B", Some("DE"))
            .edge("B", "A", 60.0);

        let result = scorer(&graph, 1).score("A", &risk(&["IR"])).await.unwrap();
        assert_eq!(result.tier, RiskTier::Medium);
        assert_eq!(result.jurisdictions, vec!["DE", "GB"]);
    }

    #[tokio::test]
    async fn test_high_flagged_neighbor() {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("B", Some("KP"))
            .edge("A", "B", 30.0);

        let result = scorer(&graph, 1).score("A", &risk(&["KP"])).await.unwrap();
        assert_eq!(result.tier, RiskTier::High);
        assert_eq!(result.exposure_count, 1);
        assert_eq!(result.flagged_neighbors[0].lei, "B");
        assert_eq!(result.flagged_neighbors[0].hops, 1);
    }

    #[tokio::test]
    async fn test_critical_when_entity_also_flagged() {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("IR"))
            .entity("B", Some("SY"))
            .edge("A", "B", 30.0);

        let result = scorer(&graph, 1).score("A", &risk(&["IR", "SY"])).await.unwrap();
        assert_eq!(result.tier, RiskTier::Critical);
    }

    #[tokio::test]
    async fn test_critical_via_ultimate_parent() {
        // C (IR) owns B owns A; A also owns D (SY).
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("B", Some("GB"))
            .entity("C", Some("IR"))
            .entity("D", Some("SY"))
            .edge("B", "A", 80.0)
            .edge("C", "B", 80.0)
            .edge("A", "D", 40.0);

        let result = scorer(&graph, 1).score("A", &risk(&["IR", "SY"])).await.unwrap();
        assert_eq!(result.ultimate_parent_lei.as_deref(), Some("C"));
        assert_eq!(result.ultimate_parent_jurisdiction.as_deref(), Some("IR"));
        assert_eq!(result.tier, RiskTier::Critical);

        // Above 80% the chain stops at A, so the parent no longer escalates.
        let result = scorer(&graph, 1)
            .score_at_threshold("A", &risk(&["IR", "SY"]), 90.0)
            .await
            .unwrap();
        assert_eq!(result.tier, RiskTier::High);
    }

    #[tokio::test]
    async fn test_two_hop_neighbor_is_high_not_critical() {
        let graph = TestGraph::new();
        graph
            .entity("A", Some("IR"))
            .entity("B", Some("GB"))
            .entity("C", Some("IR"))
            .edge("B", "A", 10.0)
            .edge("C", "B", 10.0);

        let result = scorer(&graph, 2).score("A", &risk(&["IR"])).await.unwrap();
        assert_eq!(result.tier, RiskTier::High);
        assert_eq!(result.flagged_neighbors[0].hops, 2);

        let narrow = scorer(&graph, 1).score("A", &risk(&["IR"])).await.unwrap();
        assert_eq!(narrow.tier, RiskTier::Medium);
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let graph = TestGraph::new();
        let err = scorer(&graph, 1).score("NOPE", &risk(&["IR"])).await.unwrap_err();
        assert!(matches!(err, KycError::EntityNotFound(_)));
    }

    #[test]
    fn test_empty_risk_set_never_escalates_past_medium() {
        let neighborhood = Neighborhood::default();
        let tier = classify(Some("IR"), Some("IR"), &neighborhood, &RiskCountrySet::default());
        assert_eq!(tier, RiskTier::Low);
    }
}

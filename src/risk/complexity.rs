use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::RiskTier;
use crate::config::ComplexityConfig;
use crate::model::normalize_lei;
use crate::store::GraphStore;
use crate::{KycError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityScore {
    /// Distinct entities within reach, start excluded.
    pub related_count: usize,
    /// Greatest shortest-path distance observed.
    pub max_hops: usize,
    /// Distinct jurisdictions among related entities.
    pub jurisdiction_count: usize,
    pub tier: RiskTier,
    pub jurisdictions: Vec<String>,
}

/// Structural complexity of the group surrounding an entity.
#[derive(Clone)]
pub struct ComplexityScorer {
    store: Arc<dyn GraphStore>,
    config: ComplexityConfig,
    max_depth: usize,
}

impl ComplexityScorer {
    /// `max_depth` is the same bound the chain traversal uses.
    pub fn new(store: Arc<dyn GraphStore>, config: ComplexityConfig, max_depth: usize) -> Self {
        Self {
            store,
            config,
            max_depth,
        }
    }

    pub async fn score(&self, entity_id: &str) -> Result<ComplexityScore> {
        self.score_within(entity_id, self.max_depth).await
    }

    /// Score with an explicit hop bound.
    pub async fn score_within(&self, entity_id: &str, max_depth: usize) -> Result<ComplexityScore> {
        let lei = normalize_lei(entity_id)?;
        if self.store.entity(&lei).await?.is_none() {
            return Err(KycError::EntityNotFound(lei));
        }

        let neighborhood = self.store.neighborhood(&lei, max_depth).await?;
        let jurisdictions: BTreeSet<String> = neighborhood
            .nodes
            .iter()
            .filter_map(|n| n.entity.jurisdiction.clone())
            .collect();

        let related_count = neighborhood.nodes.len();
        let jurisdiction_count = jurisdictions.len();
        let tier = classify(related_count, jurisdiction_count, &self.config);

        log::debug!(
            "Complexity for {}: {} related, {} jurisdictions, {}",
            lei,
            related_count,
            jurisdiction_count,
            tier
        );

        Ok(ComplexityScore {
            related_count,
            max_hops: neighborhood.max_hops(),
            jurisdiction_count,
            tier,
            jurisdictions: jurisdictions.into_iter().collect(),
        })
    }
}

pub fn classify(related_count: usize, jurisdiction_count: usize, config: &ComplexityConfig) -> RiskTier {
    if related_count > config.high_related_count && jurisdiction_count > config.high_jurisdiction_count {
        RiskTier::High
    } else if related_count > config.medium_related_count
        || jurisdiction_count > config.medium_jurisdiction_count
    {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

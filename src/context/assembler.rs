use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

use super::{ContextParams, KycContext, OwnershipChains, Section};
use crate::config::Config;
use crate::graph::OwnershipChainTraversal;
use crate::media::AdverseMediaLinker;
use crate::model::{normalize_lei, validate_threshold};
use crate::risk::{ComplexityScorer, JurisdictionRiskScorer};
use crate::store::GraphStore;
use crate::{KycError, Result};

/// Outcome of one entity in a batch review.
#[derive(Debug)]
pub struct BatchItem {
    pub lei: String,
    pub outcome: Result<KycContext>,
}

/// Builds a [`KycContext`] by running every component against one entity.
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn GraphStore>,
    traversal: OwnershipChainTraversal,
    jurisdiction: JurisdictionRiskScorer,
    complexity: ComplexityScorer,
    media: AdverseMediaLinker,
    defaults: ContextParams,
    batch_concurrency: usize,
}

impl ContextAssembler {
    /// Wire all components to `store` with their configured sections.
    pub fn new(store: Arc<dyn GraphStore>, config: &Config) -> Self {
        let traversal = OwnershipChainTraversal::new(store.clone(), config.traversal.clone());
        let jurisdiction =
            JurisdictionRiskScorer::new(store.clone(), traversal.clone(), config.jurisdiction.clone());
        let complexity = ComplexityScorer::new(
            store.clone(),
            config.complexity.clone(),
            config.traversal.max_depth,
        );
        let media = AdverseMediaLinker::new(store.clone(), config.adverse_media.clone());

        Self {
            store,
            traversal,
            jurisdiction,
            complexity,
            media,
            defaults: ContextParams::from_config(config),
            batch_concurrency: config.batch.concurrency,
        }
    }

    pub fn default_params(&self) -> ContextParams {
        self.defaults.clone()
    }

    pub fn traversal(&self) -> &OwnershipChainTraversal {
        &self.traversal
    }

    pub fn jurisdiction(&self) -> &JurisdictionRiskScorer {
        &self.jurisdiction
    }

    pub fn complexity(&self) -> &ComplexityScorer {
        &self.complexity
    }

    pub fn media(&self) -> &AdverseMediaLinker {
        &self.media
    }

    /// Assemble the context for one entity.
    ///
    /// Parameter errors and failures resolving the entity itself are returned
    /// as errors. Once the entity is known, component failures are recorded as
    /// unavailable sections instead.
    pub async fn assemble(&self, entity_id: &str, params: &ContextParams) -> Result<KycContext> {
        let threshold = validate_threshold(params.threshold_percent)?;
        let lei = normalize_lei(entity_id)?;

        let entity = self
            .store
            .entity(&lei)
            .await?
            .ok_or_else(|| KycError::EntityNotFound(lei.clone()))?;

        let (chain, jurisdiction, complexity, media) = tokio::join!(
            self.traversal.traverse(&lei, threshold, params.max_depth, params.top_k),
            self.jurisdiction
                .score_at_threshold(&lei, &params.risk_countries, threshold),
            self.complexity.score_within(&lei, params.max_depth),
            self.media.fetch(&lei, params.media_limit),
        );

        let chain = Section::from_result("ownership chains", chain);
        let direct_parents = chain.clone().map(|c| c.direct_parents);
        let ultimate_parent = chain.clone().map(|c| c.ultimate_parent);
        let ownership_chains = chain.map(|c| OwnershipChains {
            paths: c.paths,
            paths_explored: c.paths_explored,
            truncated: c.truncated,
        });

        let context = KycContext {
            entity,
            parameters: ContextParams {
                threshold_percent: threshold,
                ..params.clone()
            },
            direct_parents,
            ultimate_parent,
            ownership_chains,
            jurisdiction_risk: Section::from_result("jurisdiction risk", jurisdiction),
            complexity: Section::from_result("complexity", complexity),
            adverse_media: Section::from_result("adverse media", media),
        };

        let unavailable = context.unavailable_sections();
        if unavailable.is_empty() {
            log::info!("Assembled context for {}", lei);
        } else {
            log::warn!(
                "Assembled context for {} with unavailable sections: {}",
                lei,
                unavailable.join(", ")
            );
        }
        Ok(context)
    }

    /// Assemble contexts for many entities, `concurrency` at a time
    /// (configured default when `None`). Results keep input order.
    pub async fn assemble_batch(
        &self,
        entity_ids: &[String],
        params: &ContextParams,
        concurrency: Option<usize>,
    ) -> Vec<BatchItem> {
        let limit = concurrency.unwrap_or(self.batch_concurrency).max(1);
        log::info!("Assembling {} contexts ({} in flight)", entity_ids.len(), limit);

        stream::iter(entity_ids.iter().cloned())
            .map(|lei| async move {
                let outcome = self.assemble(&lei, params).await;
                if let Err(e) = &outcome {
                    log::warn!("Context for {} failed: {}", lei, e);
                }
                BatchItem { lei, outcome }
            })
            .buffered(limit)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskCountrySet;
    use crate::risk::RiskTier;
    use crate::config::QueryConfig;
    use crate::store::ResilientStore;
    use crate::testing::{FaultyStore, TestGraph};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fixture() -> TestGraph {
        // UP (KY) owns 80% of H (GB), H owns 100% of A (GB) and 30% of S (IR).
        let graph = TestGraph::new();
        graph
            .entity("A", Some("GB"))
            .entity("H", Some("GB"))
            .entity("UP", Some("KY"))
            .entity("S", Some("IR"))
            .edge("H", "A", 100.0)
            .edge("UP", "H", 80.0)
            .edge("H", "S", 30.0)
            .media("m1", "A", "Regulator fine", Some("Wire"), Some("2023-04-01"));
        graph
    }

    fn params() -> ContextParams {
        ContextParams {
            risk_countries: RiskCountrySet::new(["IR"]),
            ..ContextParams::from_config(&Config::default())
        }
    }

    #[tokio::test]
    async fn test_assemble_full_context() {
        let graph = fixture();
        let mut config = Config::default();
        config.jurisdiction.neighbor_radius = 2;
        let assembler = ContextAssembler::new(graph.store(), &config);

        let ctx = assembler.assemble("A", &params()).await.unwrap();
        assert_eq!(ctx.entity.lei, "A");
        assert!(ctx.unavailable_sections().is_empty());

        let parents = ctx.direct_parents.value().unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].entity.lei, "H");
        assert_eq!(ctx.ultimate_parent.value().unwrap().as_ref().unwrap().lei, "UP");
        assert_eq!(ctx.ownership_chains.value().unwrap().paths.len(), 1);
        assert_eq!(ctx.adverse_media.value().unwrap().len(), 1);
        // S is two hops away: flagged but not direct.
        assert_eq!(ctx.jurisdiction_risk.value().unwrap().tier, RiskTier::High);
        assert_eq!(ctx.complexity.value().unwrap().related_count, 3);
    }

    #[tokio::test]
    async fn test_identical_calls_serialize_identically() {
        let graph = fixture();
        let assembler = ContextAssembler::new(graph.store(), &Config::default());

        let first = assembler.assemble("A", &params()).await.unwrap();
        let second = assembler.assemble("A", &params()).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.digest().unwrap(), second.digest().unwrap());
        assert_eq!(first.digest().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected_before_queries() {
        let graph = fixture();
        let faulty = Arc::new(FaultyStore::new(graph.store()));
        let assembler = ContextAssembler::new(faulty.clone(), &Config::default());

        let bad = ContextParams {
            threshold_percent: 150.0,
            ..params()
        };
        let err = assembler.assemble("A", &bad).await.unwrap_err();
        assert!(matches!(err, KycError::InvalidThreshold(_)));
        assert_eq!(faulty.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_fatal() {
        let graph = fixture();
        let assembler = ContextAssembler::new(graph.store(), &Config::default());
        let err = assembler.assemble("NOPE", &params()).await.unwrap_err();
        assert!(matches!(err, KycError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn test_failing_component_marks_section_unavailable() {
        let graph = fixture();
        let faulty = Arc::new(FaultyStore::new(graph.store()).break_op("media"));
        let assembler = ContextAssembler::new(faulty, &Config::default());

        let ctx = assembler.assemble("A", &params()).await.unwrap();
        assert_eq!(ctx.unavailable_sections(), vec!["adverse_media"]);
        assert!(ctx.ownership_chains.is_available());

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["adverse_media"]["status"], "unavailable");
        assert_eq!(json["complexity"]["status"], "available");
    }

    #[tokio::test]
    async fn test_media_outage_after_retries_is_unavailable_section() {
        let graph = fixture();
        let faulty = Arc::new(FaultyStore::new(graph.store()).take_down("media"));
        let policy = QueryConfig {
            timeout_ms: 200,
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        };
        let store = Arc::new(ResilientStore::new(faulty, policy));
        let assembler = ContextAssembler::new(store, &Config::default());

        let ctx = assembler.assemble("A", &params()).await.unwrap();
        assert_eq!(ctx.unavailable_sections(), vec!["adverse_media"]);
        assert!(ctx.direct_parents.is_available());
        assert!(ctx.jurisdiction_risk.is_available());

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["adverse_media"]["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_slow_primary_lookup_times_out() {
        let graph = fixture();
        let slow = Arc::new(FaultyStore::new(graph.store()).slow(Duration::from_millis(50)));
        let policy = QueryConfig {
            timeout_ms: 10,
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
        };
        let store = Arc::new(ResilientStore::new(slow, policy));
        let assembler = ContextAssembler::new(store, &Config::default());

        let err = assembler.assemble("A", &params()).await.unwrap_err();
        assert!(matches!(err, KycError::GraphUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_neighborhood_failure_hits_both_risk_sections() {
        let graph = fixture();
        let faulty = Arc::new(FaultyStore::new(graph.store()).break_op("neighborhood"));
        let assembler = ContextAssembler::new(faulty, &Config::default());

        let ctx = assembler.assemble("A", &params()).await.unwrap();
        assert_eq!(ctx.unavailable_sections(), vec!["jurisdiction_risk", "complexity"]);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let graph = fixture();
        let faulty = Arc::new(FaultyStore::new(graph.store()).flaky(usize::MAX));
        let assembler = ContextAssembler::new(faulty, &Config::default());

        let err = assembler.assemble("A", &params()).await.unwrap_err();
        assert!(matches!(err, KycError::GraphUnavailable(_)));
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let graph = fixture();
        let assembler = ContextAssembler::new(graph.store(), &Config::default());
        let ids: Vec<String> = ["S", "NOPE", "A", "H"].iter().map(|s| s.to_string()).collect();

        let results = assembler.assemble_batch(&ids, &params(), Some(2)).await;
        let order: Vec<_> = results.iter().map(|r| r.lei.as_str()).collect();
        assert_eq!(order, vec!["S", "NOPE", "A", "H"]);
        assert!(results[0].outcome.is_ok());
        assert!(matches!(results[1].outcome, Err(KycError::EntityNotFound(_))));
        assert_eq!(results[2].outcome.as_ref().unwrap().entity.lei, "A");
    }
}

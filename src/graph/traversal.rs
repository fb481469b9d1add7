//! Upward BFS over ownership edges with per-path cycle detection.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::TraversalConfig;
use crate::graph::{
    resolve_active_edges, ChainResult, DirectParent, OwnershipLink, OwnershipPath, PathNode,
};
use crate::model::{normalize_lei, validate_threshold, Entity, OwnershipEdge};
use crate::store::{EdgeDirection, GraphStore};
use crate::{KycError, Result};

/// Finds direct parents, the ultimate parent and ranked ownership chains.
#[derive(Clone)]
pub struct OwnershipChainTraversal {
    store: Arc<dyn GraphStore>,
    config: TraversalConfig,
}

/// Lookups made during a single traversal. Dropped when the call returns.
#[derive(Default)]
struct CallMemo {
    entities: HashMap<String, Option<Entity>>,
    parents: HashMap<String, Vec<OwnershipEdge>>,
}

impl CallMemo {
    fn node(&self, lei: &str) -> Option<PathNode> {
        self.entities.get(lei).and_then(|e| e.as_ref()).map(PathNode::from)
    }
}

/// A chain still being extended.
#[derive(Clone)]
struct Partial {
    nodes: Vec<String>,
    on_path: HashSet<String>,
    links: Vec<OwnershipLink>,
    weight: f64,
    /// Some node on this chain had an owner already on the chain.
    circular: bool,
}

impl Partial {
    fn start(lei: &str) -> Self {
        Self {
            nodes: vec![lei.to_string()],
            on_path: HashSet::from([lei.to_string()]),
            links: Vec::new(),
            weight: 1.0,
            circular: false,
        }
    }

    fn tip(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }

    fn depth(&self) -> usize {
        self.links.len()
    }

    fn extend(&self, edge: &OwnershipEdge) -> Self {
        let mut next = self.clone();
        next.nodes.push(edge.parent_lei.clone());
        next.on_path.insert(edge.parent_lei.clone());
        next.links.push(OwnershipLink {
            parent_lei: edge.parent_lei.clone(),
            child_lei: edge.child_lei.clone(),
            ownership_percentage: edge.ownership_percentage,
        });
        next.weight *= edge.ownership_percentage / 100.0;
        next
    }
}

impl OwnershipChainTraversal {
    pub fn new(store: Arc<dyn GraphStore>, config: TraversalConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Traverse with the configured threshold, depth and `top_k`.
    pub async fn traverse_with_defaults(&self, start_id: &str) -> Result<ChainResult> {
        self.traverse(
            start_id,
            self.config.default_threshold,
            self.config.max_depth,
            self.config.top_k,
        )
        .await
    }

    /// Walk upward from `start_id` over active edges of at least
    /// `threshold_percent`, returning at most `top_k` ranked paths.
    ///
    /// The threshold is validated before the store is touched.
    pub async fn traverse(
        &self,
        start_id: &str,
        threshold_percent: f64,
        max_depth: usize,
        top_k: usize,
    ) -> Result<ChainResult> {
        let threshold = validate_threshold(threshold_percent)?;
        let start_lei = normalize_lei(start_id)?;
        let mut memo = CallMemo::default();

        let start = self
            .entity(&mut memo, &start_lei)
            .await?
            .ok_or_else(|| KycError::EntityNotFound(start_lei.clone()))?;

        let direct_parents: Vec<DirectParent> = self
            .qualifying_parents(&mut memo, &start_lei, threshold)
            .await?
            .into_iter()
            .filter(|edge| edge.parent_lei != start_lei)
            .filter_map(|edge| {
                memo.node(&edge.parent_lei).map(|entity| DirectParent {
                    entity,
                    ownership_percentage: edge.ownership_percentage,
                })
            })
            .collect();

        let mut frontier = VecDeque::from([Partial::start(&start_lei)]);
        let mut finished: Vec<OwnershipPath> = Vec::new();
        let mut truncated = false;

        while let Some(mut partial) = frontier.pop_front() {
            let tip = partial.tip().to_string();
            let parents = self.qualifying_parents(&mut memo, &tip, threshold).await?;
            let (cyclic, open): (Vec<_>, Vec<_>) = parents
                .into_iter()
                .partition(|edge| partial.on_path.contains(&edge.parent_lei));

            if !cyclic.is_empty() {
                log::debug!("Cycle at {} on chain from {}", tip, start_lei);
                partial.circular = true;
            }
            let at_limit = partial.depth() >= max_depth;

            if open.is_empty() || at_limit {
                if let Some(path) = materialize(&memo, &partial, at_limit && !open.is_empty()) {
                    finished.push(path);
                }
                continue;
            }

            // Owners above a cycle close are still explored; the chain keeps its flag.
            for edge in &open {
                if finished.len() + frontier.len() >= self.config.max_paths {
                    truncated = true;
                    break;
                }
                frontier.push_back(partial.extend(edge));
            }
        }

        if truncated {
            log::warn!(
                "Ownership chains from {} truncated at {} paths",
                start_lei,
                self.config.max_paths
            );
        }

        let paths_explored = finished.len();
        finished.sort_by(rank);
        let ultimate_parent = finished.first().and_then(|p| p.terminal().cloned());
        finished.truncate(top_k);

        log::debug!(
            "Traversed {} at {}%: {} direct parents, {} paths, ultimate parent {:?}",
            start_lei,
            threshold,
            direct_parents.len(),
            paths_explored,
            ultimate_parent.as_ref().map(|p| p.lei.as_str())
        );

        Ok(ChainResult {
            start: PathNode::from(&start),
            threshold_percent: threshold,
            direct_parents,
            ultimate_parent,
            paths: finished,
            paths_explored,
            truncated,
        })
    }

    async fn entity(&self, memo: &mut CallMemo, lei: &str) -> Result<Option<Entity>> {
        if let Some(cached) = memo.entities.get(lei) {
            return Ok(cached.clone());
        }
        let entity = self.store.entity(lei).await?;
        memo.entities.insert(lei.to_string(), entity.clone());
        Ok(entity)
    }

    /// Active incoming edges at or above the threshold whose parent exists,
    /// ordered by percentage desc then parent LEI.
    ///
    /// Duplicate active edges are resolved before the threshold applies, so a
    /// newer edge below the threshold disqualifies the pair.
    async fn qualifying_parents(
        &self,
        memo: &mut CallMemo,
        lei: &str,
        threshold: f64,
    ) -> Result<Vec<OwnershipEdge>> {
        if let Some(cached) = memo.parents.get(lei) {
            return Ok(cached.clone());
        }

        let raw = self
            .store
            .ownership_edges(lei, EdgeDirection::Incoming, None)
            .await?;

        let mut parents = Vec::new();
        for edge in resolve_active_edges(raw) {
            if edge.ownership_percentage < threshold {
                continue;
            }
            if self.entity(memo, &edge.parent_lei).await?.is_some() {
                parents.push(edge);
            } else {
                log::warn!(
                    "Schema violation: {} is owned by unknown entity {}, skipping edge",
                    lei,
                    edge.parent_lei
                );
            }
        }
        parents.sort_by(|a, b| {
            b.ownership_percentage
                .total_cmp(&a.ownership_percentage)
                .then_with(|| a.parent_lei.cmp(&b.parent_lei))
        });

        memo.parents.insert(lei.to_string(), parents.clone());
        Ok(parents)
    }
}

/// Turn a partial chain into a reported path. Chains with no links are not paths.
fn materialize(memo: &CallMemo, partial: &Partial, depth_limited: bool) -> Option<OwnershipPath> {
    if partial.links.is_empty() {
        return None;
    }
    let nodes: Vec<PathNode> = partial.nodes.iter().filter_map(|lei| memo.node(lei)).collect();
    Some(OwnershipPath {
        nodes,
        links: partial.links.clone(),
        cumulative_weight: partial.weight,
        depth: partial.depth(),
        circular: partial.circular,
        depth_limited,
    })
}

/// Weight desc, then depth asc, then terminal LEI, then the node sequence.
fn rank(a: &OwnershipPath, b: &OwnershipPath) -> Ordering {
    b.cumulative_weight
        .total_cmp(&a.cumulative_weight)
        .then_with(|| a.depth.cmp(&b.depth))
        .then_with(|| {
            let ta = a.terminal().map(|n| n.lei.as_str());
            let tb = b.terminal().map(|n| n.lei.as_str());
            ta.cmp(&tb)
        })
        .then_with(|| {
            a.nodes
                .iter()
                .map(|n| n.lei.as_str())
                .cmp(b.nodes.iter().map(|n| n.lei.as_str()))
        })
}

//! Ownership graph traversal: direct parents, ultimate parent and ranked
//! ownership chains above a percentage threshold.

mod edges;
mod traversal;

pub use edges::resolve_active_edges;
pub use traversal::OwnershipChainTraversal;

use serde::Serialize;

use crate::model::{Entity, EntityStatus};

/// Entity as it appears inside a chain result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathNode {
    pub lei: String,
    pub legal_name: String,
    pub jurisdiction: Option<String>,
    pub status: EntityStatus,
    pub beneficial_owner_known: bool,
}

impl From<&Entity> for PathNode {
    fn from(entity: &Entity) -> Self {
        Self {
            lei: entity.lei.clone(),
            legal_name: entity.legal_name.clone(),
            jurisdiction: entity.jurisdiction.clone(),
            status: entity.status,
            beneficial_owner_known: entity.beneficial_owner_known,
        }
    }
}

/// One hop of a chain: `parent_lei` holds `ownership_percentage` of `child_lei`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipLink {
    pub parent_lei: String,
    pub child_lei: String,
    pub ownership_percentage: f64,
}

/// An upward ownership chain starting at the queried entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipPath {
    /// Start entity first, terminal owner last.
    pub nodes: Vec<PathNode>,
    pub links: Vec<OwnershipLink>,
    /// Product of the link fractions (`percentage / 100`), in `[0, 1]`.
    pub cumulative_weight: f64,
    /// Number of links.
    pub depth: usize,
    /// The chain ran back into an entity already on it and was cut there.
    pub circular: bool,
    /// The chain stopped at the depth limit while qualifying owners remained.
    pub depth_limited: bool,
}

impl OwnershipPath {
    pub fn terminal(&self) -> Option<&PathNode> {
        self.nodes.last()
    }
}

/// Immediate owner at or above the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectParent {
    pub entity: PathNode,
    pub ownership_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    pub start: PathNode,
    pub threshold_percent: f64,
    /// Ordered by percentage desc, then LEI.
    pub direct_parents: Vec<DirectParent>,
    /// Terminal node of the highest-ranked path; `None` when nothing owns the
    /// start entity at the threshold.
    pub ultimate_parent: Option<PathNode>,
    /// Top-ranked paths, at most `top_k`.
    pub paths: Vec<OwnershipPath>,
    /// Complete paths found before ranking.
    pub paths_explored: usize,
    /// The path cap was hit and some chains were not explored.
    pub truncated: bool,
}

//! Graph store adapter contract.
//!
//! The engine consumes the graph exclusively through [`GraphStore`]. Adapters
//! convert whatever their backend returns into the typed records of
//! [`crate::model`] before handing them over.

mod resilient;
mod sqlite;

pub use resilient::{with_retry, ResilientStore};
pub use sqlite::SqliteGraphStore;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::graph::resolve_active_edges;
use crate::model::{AdverseMediaRecord, Entity, OwnershipEdge};

/// Which side of an ownership edge the queried entity sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// Edges where the entity is the child (its owners).
    Incoming,
    /// Edges where the entity is the parent (its holdings).
    Outgoing,
    Both,
}

/// Read-only query interface over a populated ownership graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetch an entity by LEI.
    async fn entity(&self, lei: &str) -> Result<Option<Entity>>;

    /// Direct ownership edges touching `lei`, optionally limited to
    /// `ownership_percentage >= min_percentage`. Edges with malformed
    /// percentages are never returned.
    async fn ownership_edges(
        &self,
        lei: &str,
        direction: EdgeDirection,
        min_percentage: Option<f64>,
    ) -> Result<Vec<OwnershipEdge>>;

    /// Entities within `max_hops` of `lei` over active edges in either direction.
    async fn neighborhood(&self, lei: &str, max_hops: usize) -> Result<Neighborhood>;

    /// Up to `cap` media records linked to `lei`, most recent first, undated
    /// last, store insertion order among ties.
    async fn adverse_media(&self, lei: &str, cap: usize) -> Result<Vec<AdverseMediaRecord>>;
}

/// An entity reached during a neighborhood walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborNode {
    pub entity: Entity,
    /// Shortest hop distance from the origin.
    pub hops: usize,
}

/// Bounded undirected neighborhood around an origin entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Neighborhood {
    pub origin: String,
    /// Reached entities, origin excluded, ordered by (hops, lei).
    pub nodes: Vec<NeighborNode>,
    /// Active edges between reached entities, ordered by (parent, child).
    pub edges: Vec<OwnershipEdge>,
}

impl Neighborhood {
    /// Greatest shortest-path distance observed.
    pub fn max_hops(&self) -> usize {
        self.nodes.iter().map(|n| n.hops).max().unwrap_or(0)
    }

    /// Neighbors exactly one hop away.
    pub fn direct(&self) -> impl Iterator<Item = &NeighborNode> {
        self.nodes.iter().filter(|n| n.hops == 1)
    }
}

/// Breadth-first neighborhood walk shared by synchronous adapters.
///
/// `adjacent` returns the raw edges touching an entity; `lookup` resolves an
/// entity. Edges to entities the store cannot resolve are dropped.
pub(crate) fn walk_neighborhood<A, L>(
    origin: &str,
    max_hops: usize,
    mut adjacent: A,
    mut lookup: L,
) -> Result<Neighborhood>
where
    A: FnMut(&str) -> Result<Vec<OwnershipEdge>>,
    L: FnMut(&str) -> Result<Option<Entity>>,
{
    let mut hops: HashMap<String, usize> = HashMap::new();
    let mut dangling: HashSet<String> = HashSet::new();
    let mut nodes = Vec::new();
    let mut edges: BTreeMap<(String, String), OwnershipEdge> = BTreeMap::new();
    let mut queue = VecDeque::new();

    hops.insert(origin.to_string(), 0);
    queue.push_back((origin.to_string(), 0usize));

    while let Some((lei, depth)) = queue.pop_front() {
        if depth >= max_hops {
            continue;
        }

        for edge in resolve_active_edges(adjacent(&lei)?) {
            let other = edge.other_end(&lei).to_string();
            if other == lei || dangling.contains(&other) {
                continue;
            }

            if !hops.contains_key(&other) {
                match lookup(&other)? {
                    Some(entity) => {
                        hops.insert(other.clone(), depth + 1);
                        nodes.push(NeighborNode { entity, hops: depth + 1 });
                        queue.push_back((other.clone(), depth + 1));
                    }
                    None => {
                        log::warn!("Schema violation: edge from {} points at unknown entity {}", lei, other);
                        dangling.insert(other);
                        continue;
                    }
                }
            }

            edges
                .entry((edge.parent_lei.clone(), edge.child_lei.clone()))
                .or_insert(edge);
        }
    }

    nodes.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.entity.lei.cmp(&b.entity.lei)));

    Ok(Neighborhood {
        origin: origin.to_string(),
        nodes,
        edges: edges.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityStatus, RelationshipStatus};

    fn entity(lei: &str) -> Entity {
        Entity {
            lei: lei.to_string(),
            legal_name: format!("{} Ltd", lei),
            jurisdiction: Some("GB".to_string()),
            status: EntityStatus::Active,
            beneficial_owner_known: false,
        }
    }

    fn edge(parent: &str, child: &str) -> OwnershipEdge {
        OwnershipEdge {
            parent_lei: parent.to_string(),
            child_lei: child.to_string(),
            ownership_percentage: 50.0,
            relationship_status: RelationshipStatus::Active,
            start_date: None,
            end_date: None,
            provenance: None,
        }
    }

    fn graph() -> Vec<OwnershipEdge> {
        // B owns A, C owns B, A owns D, X (unknown) owns D
        vec![edge("B", "A"), edge("C", "B"), edge("A", "D"), edge("X", "D")]
    }

    fn walk(origin: &str, max_hops: usize) -> Neighborhood {
        let all = graph();
        walk_neighborhood(
            origin,
            max_hops,
            |lei| {
                Ok(all
                    .iter()
                    .filter(|e| e.parent_lei == lei || e.child_lei == lei)
                    .cloned()
                    .collect())
            },
            |lei| Ok(if lei == "X" { None } else { Some(entity(lei)) }),
        )
        .unwrap()
    }

    #[test]
    fn test_walk_ignores_direction() {
        let n = walk("A", 1);
        let leis: Vec<_> = n.nodes.iter().map(|n| n.entity.lei.as_str()).collect();
        assert_eq!(leis, vec!["B", "D"]);
        assert_eq!(n.max_hops(), 1);
        assert_eq!(n.direct().count(), 2);
    }

    #[test]
    fn test_walk_depth_and_dangling() {
        let n = walk("A", 3);
        let leis: Vec<_> = n.nodes.iter().map(|n| (n.entity.lei.as_str(), n.hops)).collect();
        assert_eq!(leis, vec![("B", 1), ("D", 1), ("C", 2)]);
        assert_eq!(n.edges.len(), 3);
        assert!(n.edges.iter().all(|e| e.parent_lei != "X"));
    }

    #[test]
    fn test_walk_zero_hops() {
        let n = walk("A", 0);
        assert!(n.nodes.is_empty());
        assert_eq!(n.max_hops(), 0);
    }
}

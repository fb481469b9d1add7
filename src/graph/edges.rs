//! Active-edge selection with a deterministic tiebreak for duplicate edges.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::model::OwnershipEdge;

/// Keep only active edges, collapsing duplicates between the same ordered pair.
///
/// The store guarantees at most one active edge per (parent, child); when that
/// does not hold the edge with the latest start date wins (then the higher
/// percentage, then the smaller provenance tag) and the violation is logged.
/// Output is ordered by (parent, child).
pub fn resolve_active_edges(edges: Vec<OwnershipEdge>) -> Vec<OwnershipEdge> {
    let mut by_pair: BTreeMap<(String, String), Vec<OwnershipEdge>> = BTreeMap::new();
    for edge in edges.into_iter().filter(OwnershipEdge::is_active) {
        by_pair
            .entry((edge.parent_lei.clone(), edge.child_lei.clone()))
            .or_default()
            .push(edge);
    }

    by_pair
        .into_iter()
        .filter_map(|((parent, child), mut group)| {
            if group.len() > 1 {
                group.sort_by(preferred_first);
                log::warn!(
                    "Schema violation: {} active edges between {} and {}; using the one started {}",
                    group.len(),
                    parent,
                    child,
                    group[0]
                        .start_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "(no start date)".to_string())
                );
            }
            group.into_iter().next()
        })
        .collect()
}

fn preferred_first(a: &OwnershipEdge, b: &OwnershipEdge) -> Ordering {
    // None < Some(_) for dates, so reversing puts the latest start first.
    b.start_date
        .cmp(&a.start_date)
        .then_with(|| b.ownership_percentage.total_cmp(&a.ownership_percentage))
        .then_with(|| a.provenance.cmp(&b.provenance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationshipStatus;
    use chrono::NaiveDate;

    fn edge(parent: &str, child: &str, pct: f64, start: Option<(i32, u32, u32)>) -> OwnershipEdge {
        OwnershipEdge {
            parent_lei: parent.to_string(),
            child_lei: child.to_string(),
            ownership_percentage: pct,
            relationship_status: RelationshipStatus::Active,
            start_date: start.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            end_date: None,
            provenance: None,
        }
    }

    #[test]
    fn test_single_edges_pass_through_sorted() {
        let edges = vec![edge("Z", "A", 30.0, None), edge("B", "A", 60.0, None)];
        let resolved = resolve_active_edges(edges);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].parent_lei, "B");
        assert_eq!(resolved[1].parent_lei, "Z");
    }

    #[test]
    fn test_duplicate_keeps_latest_start_date() {
        let edges = vec![
            edge("P", "C", 80.0, Some((2015, 1, 1))),
            edge("P", "C", 40.0, Some((2021, 6, 1))),
            edge("P", "C", 90.0, None),
        ];
        let resolved = resolve_active_edges(edges);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].ownership_percentage, 40.0);
    }

    #[test]
    fn test_duplicate_same_date_prefers_higher_percentage() {
        let edges = vec![
            edge("P", "C", 30.0, Some((2020, 1, 1))),
            edge("P", "C", 70.0, Some((2020, 1, 1))),
        ];
        let resolved = resolve_active_edges(edges);
        assert_eq!(resolved[0].ownership_percentage, 70.0);
    }

    #[test]
    fn test_inactive_edges_dropped() {
        let mut ended = edge("P", "C", 50.0, Some((2010, 1, 1)));
        ended.end_date = NaiveDate::from_ymd_opt(2012, 1, 1);
        let mut inactive = edge("Q", "C", 50.0, None);
        inactive.relationship_status = RelationshipStatus::Inactive;

        let resolved = resolve_active_edges(vec![ended, inactive]);
        assert!(resolved.is_empty());
    }
}

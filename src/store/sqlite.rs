use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{walk_neighborhood, EdgeDirection, GraphStore, Neighborhood};
use crate::db::Db;
use crate::error::Result;
use crate::model::{
    normalize_jurisdiction, parse_date, validate_percentage, AdverseMediaRecord, Entity,
    EntityStatus, OwnershipEdge, RelationshipStatus,
};

const ENTITY_COLUMNS: &str = "lei, legal_name, jurisdiction, entity_status, beneficial_owner_known";
const EDGE_COLUMNS: &str =
    "parent_lei, child_lei, ownership_pct, relationship_status, start_date, end_date, provenance";

/// SQLite-backed graph store.
#[derive(Clone)]
pub struct SqliteGraphStore {
    db: Db,
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn entity(&self, lei: &str) -> Result<Option<Entity>> {
        let lei = lei.to_string();
        self.db.with_connection(move |conn| query_entity(conn, &lei)).await
    }

    async fn ownership_edges(
        &self,
        lei: &str,
        direction: EdgeDirection,
        min_percentage: Option<f64>,
    ) -> Result<Vec<OwnershipEdge>> {
        let lei = lei.to_string();
        self.db
            .with_connection(move |conn| query_edges(conn, &lei, direction, min_percentage))
            .await
    }

    async fn neighborhood(&self, lei: &str, max_hops: usize) -> Result<Neighborhood> {
        let lei = lei.to_string();
        self.db
            .with_connection(move |conn| {
                let conn: &Connection = conn;
                walk_neighborhood(
                    &lei,
                    max_hops,
                    |id| query_edges(conn, id, EdgeDirection::Both, None),
                    |id| query_entity(conn, id),
                )
            })
            .await
    }

    async fn adverse_media(&self, lei: &str, cap: usize) -> Result<Vec<AdverseMediaRecord>> {
        let lei = lei.to_string();
        let cap = i64::try_from(cap).unwrap_or(i64::MAX);
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT media_id, lei, title, source, published_on
                     FROM adverse_media
                     WHERE lei = ?1
                     ORDER BY COALESCE(TRIM(published_on), '') NOT GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*',
                              TRIM(published_on) DESC,
                              rowid ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![lei, cap], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?;

                let mut records = Vec::new();
                for row in rows {
                    let (media_id, lei, title, source, published_on) = row?;
                    let Some(title) = title.filter(|t| !t.trim().is_empty()) else {
                        log::warn!("Schema violation: media record {} has no title, skipping", media_id);
                        continue;
                    };
                    let published_on = parse_date(published_on, &format!("media {}", media_id));
                    records.push(AdverseMediaRecord {
                        media_id,
                        lei,
                        title,
                        source: source.filter(|s| !s.trim().is_empty()),
                        published_on,
                    });
                }
                Ok(records)
            })
            .await
    }
}

fn query_entity(conn: &Connection, lei: &str) -> Result<Option<Entity>> {
    let sql = format!("SELECT {} FROM legal_entities WHERE lei = ?1", ENTITY_COLUMNS);
    let row = conn
        .prepare_cached(&sql)?
        .query_row(params![lei], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })
        .optional()?;

    Ok(row.map(|(lei, legal_name, jurisdiction, status, bo_known)| {
        let jurisdiction = normalize_jurisdiction(jurisdiction, &lei);
        Entity {
            legal_name: legal_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| lei.clone()),
            jurisdiction,
            status: status.as_deref().map(EntityStatus::parse).unwrap_or(EntityStatus::Unknown),
            beneficial_owner_known: bo_known.unwrap_or(0) != 0,
            lei,
        }
    }))
}

fn query_edges(
    conn: &Connection,
    lei: &str,
    direction: EdgeDirection,
    min_percentage: Option<f64>,
) -> Result<Vec<OwnershipEdge>> {
    let filter = match direction {
        EdgeDirection::Incoming => "child_lei = ?1",
        EdgeDirection::Outgoing => "parent_lei = ?1",
        EdgeDirection::Both => "(child_lei = ?1 OR parent_lei = ?1)",
    };
    let sql = format!(
        "SELECT {} FROM ownership_edges WHERE {} ORDER BY parent_lei, child_lei, edge_id",
        EDGE_COLUMNS, filter
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![lei], EdgeRow::from_row)?;

    let mut edges = Vec::new();
    for row in rows {
        let row = row?;
        match row.into_edge() {
            Ok(edge) => {
                if min_percentage.map_or(true, |min| edge.ownership_percentage >= min) {
                    edges.push(edge);
                }
            }
            Err(e) => log::warn!("Skipping edge: {}", e),
        }
    }
    Ok(edges)
}

/// Raw `ownership_edges` row before validation.
struct EdgeRow {
    parent_lei: String,
    child_lei: String,
    ownership_pct: Value,
    relationship_status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    provenance: Option<String>,
}

impl EdgeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            parent_lei: row.get(0)?,
            child_lei: row.get(1)?,
            ownership_pct: row.get(2)?,
            relationship_status: row.get(3)?,
            start_date: row.get(4)?,
            end_date: row.get(5)?,
            provenance: row.get(6)?,
        })
    }

    fn into_edge(self) -> Result<OwnershipEdge> {
        // SQLite columns are loosely typed; text that parses as a number is accepted.
        let raw_pct = match self.ownership_pct {
            Value::Real(p) => Some(p),
            Value::Integer(p) => Some(p as f64),
            Value::Text(ref t) => t.trim().parse::<f64>().ok(),
            Value::Null | Value::Blob(_) => None,
        };
        let ownership_percentage = validate_percentage(raw_pct, &self.parent_lei, &self.child_lei)?;
        let context = format!("edge {} -> {}", self.parent_lei, self.child_lei);

        Ok(OwnershipEdge {
            ownership_percentage,
            relationship_status: self
                .relationship_status
                .as_deref()
                .map(RelationshipStatus::parse)
                .unwrap_or(RelationshipStatus::Active),
            start_date: parse_date(self.start_date, &context),
            end_date: parse_date(self.end_date, &context),
            provenance: self.provenance.filter(|p| !p.trim().is_empty()),
            parent_lei: self.parent_lei,
            child_lei: self.child_lei,
        })
    }
}

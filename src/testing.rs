//! Fixture graphs backed by a throwaway SQLite file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use crate::db::{migrate, Db};
use crate::error::{KycError, Result};
use crate::model::{AdverseMediaRecord, Entity, OwnershipEdge};
use crate::store::{EdgeDirection, GraphStore, Neighborhood, SqliteGraphStore};

pub struct TestGraph {
    _dir: TempDir,
    pub db: Db,
}

impl TestGraph {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Db::new(dir.path().join("graph.db"));
        let mut conn = db.open_connection().unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        migrate::run_migrations(&mut conn, &migrations_dir).unwrap();
        Self { _dir: dir, db }
    }

    fn conn(&self) -> Connection {
        self.db.open_connection().unwrap()
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        Arc::new(SqliteGraphStore::new(self.db.clone()))
    }

    pub fn entity(&self, lei: &str, jurisdiction: Option<&str>) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO legal_entities (lei, legal_name, jurisdiction, entity_status)
                 VALUES (?1, ?2, ?3, 'ACTIVE')",
                params![lei, format!("{} Holdings", lei), jurisdiction],
            )
            .unwrap();
        self
    }

    /// `parent` owns `pct` percent of `child`.
    pub fn edge(&self, parent: &str, child: &str, pct: f64) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO ownership_edges (parent_lei, child_lei, ownership_pct) VALUES (?1, ?2, ?3)",
                params![parent, child, pct],
            )
            .unwrap();
        self
    }

    pub fn media(&self, media_id: &str, lei: &str, title: &str, source: Option<&str>, published_on: Option<&str>) -> &Self {
        self.conn()
            .execute(
                "INSERT INTO adverse_media (media_id, lei, title, source, published_on)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![media_id, lei, title, source, published_on],
            )
            .unwrap();
        self
    }

    pub fn execute(&self, sql: &str) -> &Self {
        self.conn().execute_batch(sql).unwrap();
        self
    }
}

/// Store wrapper that injects failures and latency in front of a real store.
pub struct FaultyStore {
    inner: Arc<dyn GraphStore>,
    broken: HashSet<&'static str>,
    down: HashSet<&'static str>,
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn GraphStore>) -> Self {
        Self {
            inner,
            broken: HashSet::new(),
            down: HashSet::new(),
            transient_failures: AtomicUsize::new(0),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Permanently fail one operation: "entity", "edges", "neighborhood" or "media".
    pub fn break_op(mut self, op: &'static str) -> Self {
        self.broken.insert(op);
        self
    }

    /// Fail every call of one operation with a transient error.
    pub fn take_down(mut self, op: &'static str) -> Self {
        self.down.insert(op);
        self
    }

    /// Fail the next `n` calls of any operation with a transient error.
    pub fn flaky(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn gate(&self, op: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.contains(op) {
            return Err(KycError::SchemaViolation(format!("{} is broken", op)));
        }
        if self.down.contains(op) {
            return Err(KycError::GraphUnavailable(format!("{} unreachable", op)));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(KycError::GraphUnavailable(format!("{} flaked", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FaultyStore {
    async fn entity(&self, lei: &str) -> Result<Option<Entity>> {
        self.gate("entity").await?;
        self.inner.entity(lei).await
    }

    async fn ownership_edges(
        &self,
        lei: &str,
        direction: EdgeDirection,
        min_percentage: Option<f64>,
    ) -> Result<Vec<OwnershipEdge>> {
        self.gate("edges").await?;
        self.inner.ownership_edges(lei, direction, min_percentage).await
    }

    async fn neighborhood(&self, lei: &str, max_hops: usize) -> Result<Neighborhood> {
        self.gate("neighborhood").await?;
        self.inner.neighborhood(lei, max_hops).await
    }

    async fn adverse_media(&self, lei: &str, cap: usize) -> Result<Vec<AdverseMediaRecord>> {
        self.gate("media").await?;
        self.inner.adverse_media(lei, cap).await
    }
}

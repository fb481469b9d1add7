//! Adverse media lookup.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::AdverseMediaConfig;
use crate::model::{normalize_lei, AdverseMediaRecord};
use crate::store::GraphStore;
use crate::{KycError, Result};

/// Fetches media records linked to an entity, deduplicated and newest first.
#[derive(Clone)]
pub struct AdverseMediaLinker {
    store: Arc<dyn GraphStore>,
    config: AdverseMediaConfig,
}

impl AdverseMediaLinker {
    pub fn new(store: Arc<dyn GraphStore>, config: AdverseMediaConfig) -> Self {
        Self { store, config }
    }

    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    /// At most `limit` records, one per (title, source), most recent first
    /// with undated records last.
    pub async fn fetch(&self, entity_id: &str, limit: usize) -> Result<Vec<AdverseMediaRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lei = normalize_lei(entity_id)?;
        if self.store.entity(&lei).await?.is_none() {
            return Err(KycError::EntityNotFound(lei));
        }

        let cap = limit.saturating_mul(self.config.fetch_multiplier.max(1));
        let mut records = self.store.adverse_media(&lei, cap).await?;
        let fetched = records.len();

        // Stable: store order survives among equal dates.
        records.sort_by(newest_first);

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(dedup_key(r)));
        records.truncate(limit);

        log::debug!(
            "Adverse media for {}: {} fetched, {} returned",
            lei,
            fetched,
            records.len()
        );
        Ok(records)
    }
}

fn newest_first(a: &AdverseMediaRecord, b: &AdverseMediaRecord) -> Ordering {
    match (a.published_on, b.published_on) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn dedup_key(record: &AdverseMediaRecord) -> (String, String) {
    (
        record.title.trim().to_lowercase(),
        record
            .source
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default(),
    )
}

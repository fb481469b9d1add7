use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{EdgeDirection, GraphStore, Neighborhood};
use crate::config::QueryConfig;
use crate::error::{KycError, Result};
use crate::model::{AdverseMediaRecord, Entity, OwnershipEdge};

/// Run one store query under the per-query timeout, retrying transient
/// failures with exponential backoff.
///
/// A query that times out counts as a transient failure. When retries run
/// out the last transient error is surfaced as [`KycError::GraphUnavailable`].
pub async fn with_retry<T, F, Fut>(policy: &QueryConfig, operation: &str, mut query: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = std::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout(), query()).await {
            Ok(result) => result,
            Err(_) => Err(KycError::GraphUnavailable(format!(
                "{} timed out after {}ms",
                operation, policy.timeout_ms
            ))),
        };

        match outcome {
            Ok(value) => {
                log::debug!("{} took {:?} (attempt {})", operation, start.elapsed(), attempt + 1);
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff_delay(attempt);
                log::warn!(
                    "Retry {}/{} of {} in {:?} after error: {}",
                    attempt + 1,
                    policy.max_retries,
                    operation,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                log::error!("{} failed after {} attempts: {}", operation, attempt + 1, e);
                return Err(match e {
                    KycError::GraphUnavailable(_) => e,
                    other => KycError::GraphUnavailable(format!("{}: {}", operation, other)),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`GraphStore`] decorator applying [`with_retry`] to every query.
pub struct ResilientStore {
    inner: Arc<dyn GraphStore>,
    policy: QueryConfig,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn GraphStore>, policy: QueryConfig) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl GraphStore for ResilientStore {
    async fn entity(&self, lei: &str) -> Result<Option<Entity>> {
        with_retry(&self.policy, "entity lookup", || self.inner.entity(lei)).await
    }

    async fn ownership_edges(
        &self,
        lei: &str,
        direction: EdgeDirection,
        min_percentage: Option<f64>,
    ) -> Result<Vec<OwnershipEdge>> {
        with_retry(&self.policy, "edge query", || {
            self.inner.ownership_edges(lei, direction, min_percentage)
        })
        .await
    }

    async fn neighborhood(&self, lei: &str, max_hops: usize) -> Result<Neighborhood> {
        with_retry(&self.policy, "neighborhood query", || self.inner.neighborhood(lei, max_hops)).await
    }

    async fn adverse_media(&self, lei: &str, cap: usize) -> Result<Vec<AdverseMediaRecord>> {
        with_retry(&self.policy, "media query", || self.inner.adverse_media(lei, cap)).await
    }
}

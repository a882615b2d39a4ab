//! Effective lifetimes derived from the dependency graph.
//!
//! A cached entry never outlives the shortest-lived cached entry it embeds.
//! Lifetimes are seconds; `0` means "until evicted".

use std::sync::Arc;

use thiserror::Error;

use crate::application::repos::{EntityGraph, RepoError, descendants};
use crate::domain::entities::PageRecord;
use crate::domain::types::EntityId;

use super::store::{CacheError, CacheStore};

#[derive(Debug, Error)]
pub enum LifetimeError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone)]
pub struct LifetimeResolver {
    graph: Arc<dyn EntityGraph>,
    contents: Arc<dyn CacheStore>,
}

impl LifetimeResolver {
    pub fn new(graph: Arc<dyn EntityGraph>, contents: Arc<dyn CacheStore>) -> Self {
        Self { graph, contents }
    }

    /// Lifetime for a content fragment: capped by every cached descendant.
    pub async fn resolve_content_lifetime(
        &self,
        id: EntityId,
        declared: Option<u64>,
    ) -> Result<u64, LifetimeError> {
        let declared = declared.unwrap_or(0);
        let children = descendants(self.graph.as_ref(), id).await?;
        let recorded = self.contents.min_lifetime_among(&children, declared)?;
        Ok(shortest(declared, recorded))
    }

    /// Lifetime for a page: capped by its directly contained columns only.
    pub async fn resolve_page_lifetime(&self, page: &PageRecord) -> Result<u64, LifetimeError> {
        let declared = page.cache_lifetime.unwrap_or(0);
        let columns = self.graph.direct_children(page.id).await?;
        let recorded = self.contents.min_lifetime_among(&columns, declared)?;
        Ok(shortest(declared, recorded))
    }
}

/// Minimum of two lifetimes where `0` is "forever" and so never wins.
pub fn shortest(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, other) | (other, 0) => other,
        (a, b) => a.min(b),
    }
}

//! Traits describing the external collaborators of the render pipeline.

use std::collections::{BTreeMap, HashSet, VecDeque};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{ContentRecord, PageRecord, SiteRecord};
use crate::domain::types::EntityId;

/// Upper bound on the number of levels any graph walk may descend or ascend.
pub const MAX_GRAPH_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("entity graph backend error: {0}")]
    Backend(String),
    #[error("entity graph contains a cycle through `{id}`")]
    Cycle { id: EntityId },
    #[error("entity graph walk from `{id}` exceeded {limit} levels")]
    DepthExceeded { id: EntityId, limit: usize },
}

impl RepoError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Read access to pages, content nodes and their containment relation.
///
/// Implementations guarantee the containment relation is acyclic; the walk
/// helpers in this module still check for cycles and bound their depth.
#[async_trait]
pub trait EntityGraph: Send + Sync {
    async fn site(&self, id: EntityId) -> Result<Option<SiteRecord>, RepoError>;

    async fn page(&self, id: EntityId) -> Result<Option<PageRecord>, RepoError>;

    async fn content(&self, id: EntityId) -> Result<Option<ContentRecord>, RepoError>;

    /// Direct children of a content node, or the top-level columns of a page.
    async fn direct_children(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError>;

    /// Content nodes directly containing `id`.
    async fn direct_parents(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError>;

    /// The page whose column set transitively contains the content node `id`.
    async fn owning_page(&self, id: EntityId) -> Result<Option<EntityId>, RepoError>;

    async fn root(&self, site_id: EntityId) -> Result<Option<PageRecord>, RepoError>;

    /// Undeleted page with the given site-relative URI.
    async fn find_by_uri(
        &self,
        uri: &str,
        site_id: EntityId,
    ) -> Result<Option<PageRecord>, RepoError>;
}

/// Transitive children of `id`, breadth first, without duplicates.
pub async fn descendants(
    graph: &dyn EntityGraph,
    id: EntityId,
) -> Result<Vec<EntityId>, RepoError> {
    walk(id, |current| graph.direct_children(current)).await
}

/// Transitive content ancestors of `id`, nearest first, without duplicates.
pub async fn ancestors(graph: &dyn EntityGraph, id: EntityId) -> Result<Vec<EntityId>, RepoError> {
    walk(id, |current| graph.direct_parents(current)).await
}

async fn walk<'a, F, Fut>(start: EntityId, mut step: F) -> Result<Vec<EntityId>, RepoError>
where
    F: FnMut(EntityId) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<EntityId>, RepoError>> + 'a,
{
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    let mut frontier = VecDeque::from([(start, 0usize)]);

    while let Some((current, depth)) = frontier.pop_front() {
        for next in step(current).await? {
            if next == start {
                return Err(RepoError::Cycle { id: start });
            }
            if !seen.insert(next) {
                continue;
            }
            if depth + 1 > MAX_GRAPH_DEPTH {
                return Err(RepoError::DepthExceeded {
                    id: start,
                    limit: MAX_GRAPH_DEPTH,
                });
            }
            ordered.push(next);
            frontier.push_back((next, depth + 1));
        }
    }

    Ok(ordered)
}

/// Result of matching a request path against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// `None` means "the default controller".
    pub controller: Option<String>,
    pub action: String,
    pub params: BTreeMap<String, String>,
}

pub trait RouteTable: Send + Sync {
    fn match_path(&self, path: &str) -> Option<RouteMatch>;
}

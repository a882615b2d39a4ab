//! Invalidation plan generation.
//!
//! Expands a mutation batch into the exact set of tags to evict from the
//! content store and from the page store.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::application::repos::{EntityGraph, RepoError, ancestors};
use crate::domain::types::EntityId;

use super::events::MutationBatch;

/// Tags to evict for one batch, each listed once.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub batch_id: Uuid,
    /// Mutated content nodes and every content node embedding them.
    pub content_tags: Vec<EntityId>,
    /// Pages whose columns transitively contain a mutated content node.
    pub owning_pages: Vec<EntityId>,
    /// Pages mutated directly.
    pub mutated_pages: Vec<EntityId>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ batch: {}, content_tags: {}, owning_pages: {}, mutated_pages: {} }}",
            self.batch_id,
            self.content_tags.len(),
            self.owning_pages.len(),
            self.mutated_pages.len(),
        )
    }
}

impl InvalidationPlan {
    /// Walks the graph upwards from every mutated content node.
    ///
    /// Ids already collected in this batch are skipped, so a node reached
    /// twice (listed twice, or shared by two mutated children) appears once.
    pub async fn build(graph: &dyn EntityGraph, batch: &MutationBatch) -> Result<Self, RepoError> {
        let mut plan = Self {
            batch_id: batch.id,
            ..Self::default()
        };
        let mut processed = HashSet::new();
        let mut pages = HashSet::new();

        for mutated in batch.unique_contents() {
            if !processed.insert(mutated) {
                continue;
            }
            plan.content_tags.push(mutated);

            for ancestor in ancestors(graph, mutated).await? {
                if processed.insert(ancestor) {
                    plan.content_tags.push(ancestor);
                }
            }

            if let Some(page) = graph.owning_page(mutated).await?
                && pages.insert(page)
            {
                plan.owning_pages.push(page);
            }
        }

        // Shared subtrees can sit under columns of several pages.
        for tag in &plan.content_tags {
            let Some(content) = graph.content(*tag).await? else {
                continue;
            };
            for page in content.column_of {
                if pages.insert(page) {
                    plan.owning_pages.push(page);
                }
            }
        }

        plan.mutated_pages = batch.unique_pages();
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.content_tags.is_empty()
            && self.owning_pages.is_empty()
            && self.mutated_pages.is_empty()
    }
}

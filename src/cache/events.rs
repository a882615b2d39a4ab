//! Mutation notifications consumed by the invalidation propagator.

use std::collections::HashSet;

use uuid::Uuid;

use crate::domain::types::EntityId;

/// Monotonic counter identifying store states.
///
/// Every tag eviction advances the store epoch; a write carrying an older
/// epoch than the latest eviction of one of its tags is stale.
pub type Epoch = u64;

/// Entities mutated by one logical transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    /// Correlates log lines of one flush.
    pub id: Uuid,
    pub contents: Vec<EntityId>,
    pub pages: Vec<EntityId>,
}

impl Default for MutationBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationBatch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            contents: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn with_content(mut self, id: EntityId) -> Self {
        self.contents.push(id);
        self
    }

    pub fn with_page(mut self, id: EntityId) -> Self {
        self.pages.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.pages.is_empty()
    }

    /// Mutated content ids in first-seen order, without duplicates.
    pub fn unique_contents(&self) -> Vec<EntityId> {
        unique(&self.contents)
    }

    /// Mutated page ids in first-seen order, without duplicates.
    pub fn unique_pages(&self) -> Vec<EntityId> {
        unique(&self.pages)
    }
}

fn unique(ids: &[EntityId]) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_keeps_first_seen_order() {
        let (a, b) = (EntityId::new(), EntityId::new());
        let batch = MutationBatch::new()
            .with_content(a)
            .with_content(b)
            .with_content(a)
            .with_page(b)
            .with_page(b);

        assert_eq!(batch.unique_contents(), vec![a, b]);
        assert_eq!(batch.unique_pages(), vec![b]);
        assert!(!batch.is_empty());
        assert!(MutationBatch::new().is_empty());
    }
}

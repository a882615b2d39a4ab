use thiserror::Error;

use crate::domain::types::{EntityId, EntityKind};

/// Edits the entity graph refuses to apply.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{kind} `{id}` does not exist")]
    UnknownEntity { kind: EntityKind, id: EntityId },
    #[error("update for `{id}` changes nothing")]
    EmptyUpdate { id: EntityId },
    #[error("uri `{uri}` already belongs to a live page")]
    UriTaken { uri: String },
}

impl DomainError {
    pub fn unknown(kind: EntityKind, id: EntityId) -> Self {
        Self::UnknownEntity { kind, id }
    }
}

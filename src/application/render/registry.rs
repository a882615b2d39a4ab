use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::types::EntityKind;

use super::types::{RenderContext, RenderError, RenderInput};

/// Turns one entity plus its already rendered children into bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Name that distinguishes this renderer's output in cache keys.
    fn identity(&self) -> &str;

    /// Auxiliary parameters the output depends on besides entity and mode.
    fn fingerprint(&self, context: &RenderContext) -> String {
        context.fingerprint()
    }

    async fn render(&self, input: RenderInput<'_>) -> Result<Bytes, RenderError>;
}

/// Maps entity kinds to the renderer responsible for them.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    by_kind: HashMap<EntityKind, Arc<dyn Renderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: EntityKind, renderer: Arc<dyn Renderer>) -> Self {
        self.by_kind.insert(kind, renderer);
        self
    }

    /// Registers `renderer` for every entity kind.
    pub fn uniform(renderer: Arc<dyn Renderer>) -> Self {
        Self::new()
            .register(EntityKind::Page, renderer.clone())
            .register(EntityKind::Content, renderer)
    }

    pub fn get(&self, kind: EntityKind) -> Result<Arc<dyn Renderer>, RenderError> {
        self.by_kind
            .get(&kind)
            .cloned()
            .ok_or(RenderError::MissingRenderer { kind })
    }
}

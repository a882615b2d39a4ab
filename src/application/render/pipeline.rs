use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::{debug, instrument};

use crate::application::events::{NotificationBus, RenderEvent};
use crate::application::repos::{EntityGraph, MAX_GRAPH_DEPTH};
use crate::domain::entities::{PageRecord, RenderTarget, Renderable};
use crate::domain::types::{EntityId, EntityKind};

use super::registry::RendererRegistry;
use super::types::{Fragment, RenderContext, RenderError, RenderInput};

/// Renders pages and content trees, children before parents.
///
/// Every entity passes through the pre-render and post-render notifications;
/// a listener that serves a cached payload on pre-render short-circuits the
/// whole subtree.
#[derive(Clone)]
pub struct RenderService {
    graph: Arc<dyn EntityGraph>,
    renderers: RendererRegistry,
    bus: NotificationBus,
}

impl RenderService {
    pub fn new(
        graph: Arc<dyn EntityGraph>,
        renderers: RendererRegistry,
        bus: NotificationBus,
    ) -> Self {
        Self {
            graph,
            renderers,
            bus,
        }
    }

    #[instrument(skip_all, fields(page = %page.id, mode = context.mode()))]
    pub async fn render_page(
        &self,
        page: &PageRecord,
        context: &RenderContext,
    ) -> Result<Bytes, RenderError> {
        self.render_node(RenderTarget::Page(page.clone()), context, 0)
            .await
    }

    #[instrument(skip(self, context), fields(mode = context.mode()))]
    pub async fn render_content(
        &self,
        id: EntityId,
        context: &RenderContext,
    ) -> Result<Bytes, RenderError> {
        self.render_content_at(id, context, 0).await
    }

    fn render_content_at<'a>(
        &'a self,
        id: EntityId,
        context: &'a RenderContext,
        depth: usize,
    ) -> BoxFuture<'a, Result<Bytes, RenderError>> {
        Box::pin(async move {
            if depth > MAX_GRAPH_DEPTH {
                return Err(RenderError::Cycle { id });
            }
            let content = self
                .graph
                .content(id)
                .await?
                .ok_or(RenderError::MissingEntity {
                    kind: EntityKind::Content,
                    id,
                })?;
            self.render_node(RenderTarget::Content(content), context, depth)
                .await
        })
    }

    async fn render_node(
        &self,
        target: RenderTarget,
        context: &RenderContext,
        depth: usize,
    ) -> Result<Bytes, RenderError> {
        let renderer = self.renderers.get(target.kind())?;
        let id = target.identity();
        let mut event = RenderEvent::new(
            target,
            context.clone(),
            renderer.identity(),
            renderer.fingerprint(context),
        );

        self.bus.pre_render(&mut event).await;
        if let Some(cached) = event.take_cached() {
            debug!(entity = %id, "Render short-circuited by cached payload");
            return Ok(cached);
        }

        let mut children = Vec::new();
        for child in self.graph.direct_children(id).await? {
            let body = self.render_content_at(child, context, depth + 1).await?;
            children.push(Fragment { id: child, body });
        }

        let output = renderer
            .render(RenderInput {
                target: event.target(),
                context,
                children: &children,
            })
            .await?;

        event.set_output(output.clone());
        self.bus.post_render(&mut event).await;
        Ok(output)
    }
}

//! Wiring of graph, cache, render service and dispatcher into one application.

use std::sync::Arc;

use crate::application::dispatch::{Dispatcher, FrontController, FrontSettings};
use crate::application::events::NotificationBus;
use crate::application::render::{RenderService, RendererRegistry};
use crate::application::repos::EntityGraph;
use crate::cache::{CacheConfig, RenderCache};
use crate::config::Settings;

use super::error::InfraError;
use super::graph::MemoryGraph;
use super::http::{AdminState, HttpState};
use super::renderer::OutlineRenderer;
use super::routes::PatternRoutes;

/// Everything a listener or the `render` command needs.
#[derive(Clone)]
pub struct Application {
    pub graph: Arc<MemoryGraph>,
    pub cache: RenderCache,
    pub dispatcher: Arc<Dispatcher>,
}

impl Application {
    /// Loads the configured site fixture and wires the full stack.
    pub fn from_settings(settings: &Settings) -> Result<Self, InfraError> {
        let fixture = settings.site.fixture.as_ref().ok_or_else(|| {
            InfraError::configuration("no site fixture configured (site.fixture or --site-fixture)")
        })?;
        let graph = Arc::new(MemoryGraph::from_path(fixture)?);

        let cache_config = CacheConfig::from(&settings.cache);
        let front = FrontSettings {
            url_extension: settings.site.url_extension.clone(),
            force_url_extension: settings.site.force_url_extension,
        };
        let routes = PatternRoutes::from_settings(&settings.dispatch.routes)?;
        let fallback = PatternRoutes::catch_all(&settings.dispatch)?;

        let entity_graph: Arc<dyn EntityGraph> = graph.clone();
        let cache = RenderCache::in_memory(&cache_config, entity_graph);
        Ok(Self::assemble(graph, cache, &cache_config, front, routes, fallback))
    }

    /// Wires caller-provided parts; the cache listener is subscribed only when
    /// at least one cache layer is enabled.
    pub fn assemble(
        graph: Arc<MemoryGraph>,
        cache: RenderCache,
        cache_config: &CacheConfig,
        front: FrontSettings,
        routes: PatternRoutes,
        fallback: PatternRoutes,
    ) -> Self {
        let entity_graph: Arc<dyn EntityGraph> = graph.clone();

        let mut bus = NotificationBus::new();
        if cache_config.is_enabled() {
            bus.subscribe(cache.listener.clone());
        }

        let renderers = RendererRegistry::uniform(Arc::new(OutlineRenderer::new()));
        let render = RenderService::new(entity_graph.clone(), renderers, bus.clone());
        let controller = FrontController::new(entity_graph, render, graph.site_id(), front);

        let dispatcher = Dispatcher::new(Arc::new(routes), bus)
            .with_fallback(Arc::new(fallback))
            .with_controller(Arc::new(controller));

        Self {
            graph,
            cache,
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn http_state(&self, preview_token: Option<String>) -> HttpState {
        HttpState::new(self.dispatcher.clone()).with_preview_token(preview_token)
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            graph: self.graph.clone(),
            cache: self.cache.clone(),
        }
    }
}

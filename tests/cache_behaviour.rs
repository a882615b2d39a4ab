//! End-to-end behaviour of the render cache behind the dispatch pipeline.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;

use quire::application::dispatch::{DispatchRequest, FrontSettings};
use quire::application::events::NotificationBus;
use quire::application::render::{
    RenderContext, RenderError, RenderInput, RenderService, Renderer, RendererRegistry,
};
use quire::application::repos::{EntityGraph, RepoError};
use quire::cache::{
    CacheConfig, CacheError, CacheKey, CacheStore, CacheWrite, Epoch, FlushError,
    InvalidationPropagator, MemoryStore, MutationBatch, PutOutcome, RenderCache, content_key,
    page_key,
};
use quire::config::{DispatchSettings, RouteSettings};
use quire::domain::entities::{ContentRecord, PageRecord, RenderTarget, SiteRecord};
use quire::domain::types::EntityId;
use quire::infra::app::Application;
use quire::infra::graph::{ContentUpdate, MemoryGraph};
use quire::infra::renderer::OutlineRenderer;
use quire::infra::routes::PatternRoutes;

const SITE: &str = r#"
[site]
label = "Cache test"
default_extension = "html"

[[pages]]
key = "home"
uri = "/"
title = "Home"
cache_lifetime = 600
columns = ["home-main"]

[[pages]]
key = "news"
uri = "/news"
title = "News"
columns = ["news-main"]

[[pages]]
key = "draft"
uri = "/draft"
title = "Draft"
state = "offline"
columns = ["draft-main"]

[[contents]]
key = "home-main"
class_name = "content_set"
children = ["intro", "latest", "contact"]

[[contents]]
key = "intro"
body = "Welcome"

[[contents]]
key = "latest"
class_name = "content_set"
children = ["headline-1", "headline-2"]

[[contents]]
key = "headline-1"
body = "First"
cache_lifetime = 120

[[contents]]
key = "headline-2"
body = "Second"
cache_lifetime = 60

[[contents]]
key = "contact"
body = "Write to us"
cache_enabled = false

[[contents]]
key = "news-main"
class_name = "content_set"
children = ["latest"]

[[contents]]
key = "draft-main"
class_name = "content_set"
children = ["draft-body"]

[[contents]]
key = "draft-body"
body = "Not yet"
"#;

const HOST: &str = "site.test";

fn graph() -> Arc<MemoryGraph> {
    Arc::new(MemoryGraph::from_toml_str(SITE, "cache_behaviour").expect("fixture parses"))
}

fn assemble(graph: Arc<MemoryGraph>, cache: RenderCache, config: &CacheConfig) -> Application {
    let routes = PatternRoutes::from_settings(&[RouteSettings {
        pattern: "/feed/{*uri}".to_string(),
        controller: None,
        action: Some("rss".to_string()),
    }])
    .expect("routes");
    let fallback = PatternRoutes::catch_all(&DispatchSettings::default()).expect("catch-all");
    Application::assemble(
        graph,
        cache,
        config,
        FrontSettings::default(),
        routes,
        fallback,
    )
}

fn app_with(config: CacheConfig) -> Application {
    let graph = graph();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let cache = RenderCache::in_memory(&config, entity_graph);
    assemble(graph, cache, &config)
}

fn id(app: &Application, key: &str) -> EntityId {
    app.graph.resolve_handle(key).expect("known fixture key")
}

fn fragment_key(id: EntityId) -> CacheKey {
    content_key(id, RenderContext::DEFAULT_MODE, "outline", "")
}

async fn body(app: &Application, target: &str) -> String {
    let response = app
        .dispatcher
        .handle(&DispatchRequest::get(HOST, target))
        .await
        .expect("dispatched");
    String::from_utf8(response.into_body().to_vec()).expect("utf-8 body")
}

fn set_body(app: &Application, key: &str, text: &str) {
    app.graph
        .update_content(
            id(app, key),
            ContentUpdate {
                body: Some(text.to_string()),
                ..ContentUpdate::default()
            },
        )
        .expect("content exists");
}

#[tokio::test]
async fn second_request_is_served_from_the_page_cache() {
    let app = app_with(CacheConfig::default());

    let first = body(&app, "/").await;
    assert!(first.contains("Welcome"));
    assert!(
        app.cache
            .pages
            .get(&page_key("http://site.test/"))
            .expect("page store")
            .is_some()
    );

    // Changed without a flush: the cached page keeps winning.
    set_body(&app, "intro", "Changed");
    assert_eq!(body(&app, "/").await, first);
}

#[tokio::test]
async fn flushing_a_leaf_evicts_its_ancestors_and_every_page_showing_it() {
    let app = app_with(CacheConfig::default());
    body(&app, "/").await;
    body(&app, "/news.html").await;

    set_body(&app, "headline-2", "Breaking");
    let report = app
        .cache
        .propagator
        .flush(&MutationBatch::new().with_content(id(&app, "headline-2")))
        .await
        .expect("flush");

    assert_eq!(report.page_evicted, 2);
    let contents = &app.cache.contents;
    assert!(contents.get(&fragment_key(id(&app, "headline-2"))).expect("get").is_none());
    assert!(contents.get(&fragment_key(id(&app, "latest"))).expect("get").is_none());
    // Siblings outside the ancestor chain stay cached.
    assert!(contents.get(&fragment_key(id(&app, "intro"))).expect("get").is_some());
    assert!(contents.get(&fragment_key(id(&app, "headline-1"))).expect("get").is_some());

    assert!(body(&app, "/").await.contains("Breaking"));
    assert!(body(&app, "/news.html").await.contains("Breaking"));
}

#[tokio::test]
async fn columns_and_disabled_content_are_never_stored() {
    let app = app_with(CacheConfig::default());
    body(&app, "/").await;

    let contents = &app.cache.contents;
    assert!(contents.get(&fragment_key(id(&app, "home-main"))).expect("get").is_none());
    assert!(contents.get(&fragment_key(id(&app, "contact"))).expect("get").is_none());
    assert!(contents.get(&fragment_key(id(&app, "latest"))).expect("get").is_some());
}

#[tokio::test]
async fn parent_lifetime_is_capped_by_its_shortest_child() {
    let app = app_with(CacheConfig::default());
    body(&app, "/").await;

    let latest = id(&app, "latest");
    let remaining = app
        .cache
        .contents
        .min_lifetime_among(&[latest], 9999)
        .expect("lifetime");
    assert_eq!(remaining, 60);

    // The page only consults its column, which is never cached itself.
    let page = app
        .cache
        .pages
        .min_lifetime_among(&[id(&app, "home")], 9999)
        .expect("lifetime");
    assert_eq!(page, 600);
}

#[tokio::test]
async fn offline_pages_are_rendered_for_elevated_requests_but_never_cached() {
    let app = app_with(CacheConfig::default());
    let request = DispatchRequest::get(HOST, "/draft.html").with_elevated(true);

    let response = app.dispatcher.handle(&request).await.expect("visible");
    assert!(String::from_utf8_lossy(response.body()).contains("Not yet"));
    assert!(
        app.cache
            .pages
            .get(&page_key("http://site.test/draft.html"))
            .expect("get")
            .is_none()
    );
    assert!(
        app.cache
            .contents
            .get(&fragment_key(id(&app, "draft-body")))
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn elevated_requests_bypass_stored_pages() {
    let app = app_with(CacheConfig::default());
    body(&app, "/").await;
    set_body(&app, "intro", "Fresh for editors");

    let elevated = app
        .dispatcher
        .handle(&DispatchRequest::get(HOST, "/").with_elevated(true))
        .await
        .expect("dispatched");
    assert!(String::from_utf8_lossy(elevated.body()).contains("Fresh for editors"));
    // Anonymous visitors still get the stored copy.
    assert!(body(&app, "/").await.contains("Welcome"));
}

#[tokio::test]
async fn disabled_cache_renders_live_every_time() {
    let app = app_with(CacheConfig {
        enable_content_cache: false,
        enable_page_cache: false,
        ..CacheConfig::default()
    });
    body(&app, "/").await;
    set_body(&app, "intro", "Live");

    assert!(body(&app, "/").await.contains("Live"));
    assert!(app.cache.pages.get(&page_key("http://site.test/")).expect("get").is_none());
}

#[tokio::test]
async fn query_strings_are_not_cached_by_default() {
    let app = app_with(CacheConfig::default());
    body(&app, "/news.html?b=2&a=1").await;
    assert!(
        app.cache
            .pages
            .get(&page_key("http://site.test/news.html?a=1&b=2"))
            .expect("get")
            .is_none()
    );

    let app = app_with(CacheConfig {
        cache_query_strings: true,
        ..CacheConfig::default()
    });
    body(&app, "/news.html?b=2&a=1").await;
    assert!(
        app.cache
            .pages
            .get(&page_key("http://site.test/news.html?a=1&b=2"))
            .expect("get")
            .is_some()
    );
}

/// Store whose backend is always down.
struct Unreachable;

impl CacheStore for Unreachable {
    fn layer(&self) -> &'static str {
        "content"
    }

    fn get(&self, _key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn put_entry(&self, _write: CacheWrite) -> Result<PutOutcome, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn evict_by_tag(&self, _tag: EntityId) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn min_lifetime_among(&self, _tags: &[EntityId], _fallback: u64) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn epoch(&self) -> Result<Epoch, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn clear(&self) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }
}

#[tokio::test]
async fn unreachable_store_degrades_to_live_rendering_but_fails_flushes() {
    let config = CacheConfig::default();
    let graph = graph();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let store: Arc<dyn CacheStore> = Arc::new(Unreachable);
    let cache = RenderCache::with_stores(&config, entity_graph, store.clone(), store);
    let app = assemble(graph, cache, &config);

    assert!(body(&app, "/").await.contains("Welcome"));
    set_body(&app, "intro", "Still live");
    assert!(body(&app, "/").await.contains("Still live"));

    let err = app
        .cache
        .propagator
        .flush(&MutationBatch::new().with_content(id(&app, "intro")))
        .await
        .expect_err("backend down");
    assert!(matches!(err, FlushError::Incomplete { .. }));
}

/// In-memory store whose evictions fail while reads and writes still work.
struct EvictionsDown {
    inner: MemoryStore,
}

impl CacheStore for EvictionsDown {
    fn layer(&self) -> &'static str {
        "content"
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        self.inner.get(key)
    }

    fn put_entry(&self, write: CacheWrite) -> Result<PutOutcome, CacheError> {
        self.inner.put_entry(write)
    }

    fn evict_by_tag(&self, _tag: EntityId) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable { layer: "content" })
    }

    fn min_lifetime_among(&self, tags: &[EntityId], fallback: u64) -> Result<u64, CacheError> {
        self.inner.min_lifetime_among(tags, fallback)
    }

    fn epoch(&self) -> Result<Epoch, CacheError> {
        self.inner.epoch()
    }

    fn clear(&self) -> Result<usize, CacheError> {
        self.inner.clear()
    }
}

#[tokio::test]
async fn failing_content_evictions_still_flush_pages() {
    let config = CacheConfig::default();
    let graph = graph();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let contents: Arc<dyn CacheStore> = Arc::new(EvictionsDown {
        inner: MemoryStore::new("content", NonZeroUsize::new(64).expect("non-zero")),
    });
    let pages: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(
        "page",
        NonZeroUsize::new(64).expect("non-zero"),
    ));
    let cache = RenderCache::with_stores(&config, entity_graph, contents, pages);
    let app = assemble(graph, cache, &config);

    body(&app, "/").await;
    let home = page_key("http://site.test/");
    assert!(app.cache.pages.get(&home).expect("get").is_some());

    let err = app
        .cache
        .propagator
        .flush(&MutationBatch::new().with_content(id(&app, "intro")))
        .await
        .expect_err("content evictions fail");
    let FlushError::Incomplete { failed, report, .. } = err else {
        panic!("expected an incomplete flush");
    };
    assert!(failed >= 1);
    assert_eq!(report.page_evicted, 1);
    assert!(app.cache.pages.get(&home).expect("get").is_none());
}

/// Evicts the rendered entity from the store while its render is in flight,
/// standing in for a concurrent flush.
struct EvictingRenderer {
    store: Arc<dyn CacheStore>,
}

#[async_trait]
impl Renderer for EvictingRenderer {
    fn identity(&self) -> &str {
        "outline"
    }

    async fn render(&self, input: RenderInput<'_>) -> Result<Bytes, RenderError> {
        let RenderTarget::Content(content) = input.target else {
            return Ok(Bytes::new());
        };
        self.store
            .evict_by_tag(content.id)
            .map_err(|err| RenderError::renderer("evicting", err.to_string()))?;
        Ok(Bytes::from(content.body.clone()))
    }
}

#[tokio::test]
async fn a_render_racing_an_eviction_is_not_stored() {
    let config = CacheConfig::default();
    let graph = graph();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let cache = RenderCache::in_memory(&config, entity_graph.clone());

    let renderers = RendererRegistry::uniform(Arc::new(EvictingRenderer {
        store: cache.contents.clone(),
    }));
    let bus = NotificationBus::new().with_listener(cache.listener.clone());
    let render = RenderService::new(entity_graph, renderers, bus);

    let intro = graph.resolve_handle("intro").expect("intro");
    let output = render
        .render_content(intro, &RenderContext::default())
        .await
        .expect("rendered");

    assert_eq!(output, Bytes::from_static(b"Welcome"));
    assert!(cache.contents.get(&fragment_key(intro)).expect("get").is_none());
}

/// Graph that, once armed, edits and flushes a node right after handing out
/// its old record, as an admin edit landing mid-render would.
struct EditDuringRead {
    inner: Arc<MemoryGraph>,
    target: EntityId,
    armed: AtomicBool,
    propagator: OnceLock<InvalidationPropagator>,
}

#[async_trait]
impl EntityGraph for EditDuringRead {
    async fn site(&self, id: EntityId) -> Result<Option<SiteRecord>, RepoError> {
        self.inner.site(id).await
    }

    async fn page(&self, id: EntityId) -> Result<Option<PageRecord>, RepoError> {
        self.inner.page(id).await
    }

    async fn content(&self, id: EntityId) -> Result<Option<ContentRecord>, RepoError> {
        let record = self.inner.content(id).await?;
        if id == self.target && self.armed.swap(false, Ordering::SeqCst) {
            self.inner
                .update_content(
                    id,
                    ContentUpdate {
                        body: Some("Changed".to_string()),
                        ..ContentUpdate::default()
                    },
                )
                .expect("edit");
            self.propagator
                .get()
                .expect("propagator wired")
                .flush(&MutationBatch::new().with_content(id))
                .await
                .expect("flush");
        }
        Ok(record)
    }

    async fn direct_children(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError> {
        self.inner.direct_children(id).await
    }

    async fn direct_parents(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError> {
        self.inner.direct_parents(id).await
    }

    async fn owning_page(&self, id: EntityId) -> Result<Option<EntityId>, RepoError> {
        self.inner.owning_page(id).await
    }

    async fn root(&self, site_id: EntityId) -> Result<Option<PageRecord>, RepoError> {
        self.inner.root(site_id).await
    }

    async fn find_by_uri(
        &self,
        uri: &str,
        site_id: EntityId,
    ) -> Result<Option<PageRecord>, RepoError> {
        self.inner.find_by_uri(uri, site_id).await
    }
}

#[tokio::test]
async fn an_edit_flushed_while_its_record_is_read_is_not_undone() {
    let inner = graph();
    let intro = inner.resolve_handle("intro").expect("intro");
    let wrapper = Arc::new(EditDuringRead {
        inner,
        target: intro,
        armed: AtomicBool::new(false),
        propagator: OnceLock::new(),
    });
    let entity_graph: Arc<dyn EntityGraph> = wrapper.clone();
    let cache = RenderCache::in_memory(&CacheConfig::default(), entity_graph.clone());
    assert!(wrapper.propagator.set(cache.propagator.clone()).is_ok());

    let render = RenderService::new(
        entity_graph,
        RendererRegistry::uniform(Arc::new(OutlineRenderer::new())),
        NotificationBus::new().with_listener(cache.listener.clone()),
    );
    let context = RenderContext::default();
    let rendered = |bytes: Bytes| String::from_utf8(bytes.to_vec()).expect("utf-8");

    let first = render.render_content(intro, &context).await.expect("rendered");
    assert!(rendered(first).contains("Welcome"));

    wrapper.armed.store(true, Ordering::SeqCst);
    let during = render.render_content(intro, &context).await.expect("rendered");
    assert!(rendered(during).contains("Changed"));

    let after = render.render_content(intro, &context).await.expect("rendered");
    let after = rendered(after);
    assert!(after.contains("Changed"), "stored output predates the edit: {after}");
    assert!(!after.contains("Welcome"));
}

#[tokio::test]
async fn clear_empties_both_layers() {
    let app = app_with(CacheConfig::default());
    body(&app, "/").await;

    let removed = app.cache.clear().expect("clear");
    assert!(removed >= 4);
    assert!(app.cache.pages.get(&page_key("http://site.test/")).expect("get").is_none());

    let tags: BTreeSet<EntityId> = [id(&app, "intro")].into_iter().collect();
    app.cache
        .contents
        .put(fragment_key(id(&app, "intro")), Bytes::from_static(b"x"), 0, tags)
        .expect("put after clear");
}

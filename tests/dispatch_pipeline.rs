//! URL resolution, redirects and error handling through the front controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};

use quire::application::dispatch::{
    ControllerBinding, DispatchRequest, DispatchResponse, Dispatcher, FrontController,
    FrontSettings,
};
use quire::application::error::DispatchErrorKind;
use quire::application::events::{
    ErrorEvent, Listener, NotificationBus, RenderEvent, ResponseEvent,
};
use quire::application::render::{RenderService, RendererRegistry};
use quire::application::repos::EntityGraph;
use quire::cache::{CacheConfig, RenderCache};
use quire::config::{DispatchSettings, RouteSettings};
use quire::infra::app::Application;
use quire::infra::graph::MemoryGraph;
use quire::infra::renderer::OutlineRenderer;
use quire::infra::routes::PatternRoutes;

const SITE: &str = r#"
[site]
label = "Dispatch test"

[[pages]]
key = "home"
uri = "/"
title = "Home"
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

[[pages]]
key = "moved"
uri = "/moved"
title = "Moved"
redirect = "/news.html"
use_url_redirect = true
columns = ["news-main"]

[[pages]]
key = "dormant"
uri = "/dormant"
title = "Dormant redirect"
redirect = "/news.html"
use_url_redirect = false

[[contents]]
key = "home-main"
class_name = "content_set"
children = ["intro"]

[[contents]]
key = "intro"
body = "Hello & welcome"

[[contents]]
key = "news-main"
class_name = "content_set"
children = ["item"]

[[contents]]
key = "item"
label = "Release"
body = "Version one"
"#;

const HOST: &str = "site.test";

fn graph() -> Arc<MemoryGraph> {
    Arc::new(MemoryGraph::from_toml_str(SITE, "dispatch_pipeline").expect("fixture parses"))
}

fn routes() -> PatternRoutes {
    PatternRoutes::from_settings(&[RouteSettings {
        pattern: "/feed/{*uri}".to_string(),
        controller: None,
        action: Some("rss".to_string()),
    }])
    .expect("routes")
}

fn catch_all() -> PatternRoutes {
    PatternRoutes::catch_all(&DispatchSettings::default()).expect("catch-all")
}

fn app(front: FrontSettings) -> Application {
    let graph = graph();
    let config = CacheConfig::default();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let cache = RenderCache::in_memory(&config, entity_graph);
    Application::assemble(graph, cache, &config, front, routes(), catch_all())
}

/// Dispatcher with extra listeners on its bus and no cache.
fn dispatcher_with(listeners: Vec<Arc<dyn Listener>>) -> Dispatcher {
    let graph = graph();
    let entity_graph: Arc<dyn EntityGraph> = graph.clone();
    let bus = listeners
        .into_iter()
        .fold(NotificationBus::new(), NotificationBus::with_listener);

    let render = RenderService::new(
        entity_graph.clone(),
        RendererRegistry::uniform(Arc::new(OutlineRenderer::new())),
        bus.clone(),
    );
    let front = FrontController::new(
        entity_graph,
        render,
        graph.site_id(),
        FrontSettings::default(),
    );
    Dispatcher::new(Arc::new(routes()), bus)
        .with_fallback(Arc::new(catch_all()))
        .with_controller(Arc::new(front))
}

async fn status(app: &Application, target: &str) -> StatusCode {
    match app.dispatcher.handle(&DispatchRequest::get(HOST, target)).await {
        Ok(response) => response.status(),
        Err(err) => err.status(),
    }
}

#[tokio::test]
async fn root_resolves_from_slash_empty_and_root_marker() {
    let app = app(FrontSettings::default());
    for target in ["/", "", "/_root_"] {
        let response = app
            .dispatcher
            .handle(&DispatchRequest::get(HOST, target))
            .await
            .expect("root page");
        assert_eq!(response.status(), StatusCode::OK, "target `{target}`");
        assert!(String::from_utf8_lossy(response.body()).contains("Hello &amp; welcome"));
    }
}

#[tokio::test]
async fn extension_is_enforced_against_the_configured_default() {
    let app = app(FrontSettings::default());
    assert_eq!(status(&app, "/news.html").await, StatusCode::OK);
    assert_eq!(status(&app, "/news/").await, StatusCode::OK);
    assert_eq!(status(&app, "/news").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&app, "/news.php").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&app, "/missing.html").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bare_urls_are_accepted_when_the_extension_is_optional() {
    let app = app(FrontSettings {
        url_extension: "htm".to_string(),
        force_url_extension: false,
    });
    assert_eq!(status(&app, "/news").await, StatusCode::OK);
    assert_eq!(status(&app, "/news.htm").await, StatusCode::OK);
    assert_eq!(status(&app, "/news.html").await, StatusCode::NOT_FOUND);
}

/// Counts render attempts.
#[derive(Default)]
struct RenderCounter {
    renders: AtomicUsize,
}

#[async_trait]
impl Listener for RenderCounter {
    fn name(&self) -> &'static str {
        "render-counter"
    }

    async fn on_pre_render(&self, _event: &mut RenderEvent) {
        self.renders.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn active_redirects_win_over_rendering() {
    let counter = Arc::new(RenderCounter::default());
    let listener: Arc<dyn Listener> = counter.clone();
    let dispatcher = dispatcher_with(vec![listener]);
    let response = dispatcher
        .handle(&DispatchRequest::get(HOST, "/moved.html"))
        .await
        .expect("redirect");
    assert_eq!(counter.renders.load(Ordering::SeqCst), 0);

    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/news.html");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate"
    );
    assert!(response.body().is_empty());

    // A redirect target without the flag set is ignored and the page renders.
    let dormant = dispatcher
        .handle(&DispatchRequest::get(HOST, "/dormant.html"))
        .await
        .expect("rendered");
    assert_eq!(dormant.status(), StatusCode::OK);
    assert!(counter.renders.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn offline_pages_exist_only_for_elevated_requesters() {
    let app = app(FrontSettings::default());
    assert_eq!(status(&app, "/draft.html").await, StatusCode::NOT_FOUND);

    let elevated = app
        .dispatcher
        .handle(&DispatchRequest::get(HOST, "/draft.html").with_elevated(true))
        .await
        .expect("visible when elevated");
    assert_eq!(elevated.status(), StatusCode::OK);
}

#[tokio::test]
async fn feed_route_renders_rss() {
    let app = app(FrontSettings::default());
    let response = app
        .dispatcher
        .handle(&DispatchRequest::get(HOST, "/feed/news.xml"))
        .await
        .expect("feed");

    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
    let body = String::from_utf8_lossy(response.body()).into_owned();
    assert!(body.starts_with("<?xml"));
    assert!(body.contains("<rss version=\"2.0\">"));
    assert!(body.contains("Version one"));
}

#[tokio::test]
async fn missing_feed_falls_back_to_the_page_lookup() {
    let app = app(FrontSettings::default());
    let err = app
        .dispatcher
        .handle(&DispatchRequest::get(HOST, "/feed/nothing.xml"))
        .await
        .expect_err("no feed");
    assert_eq!(err.kind(), DispatchErrorKind::NotFound);
}

#[tokio::test]
async fn unknown_actions_are_bad_requests() {
    let app = app(FrontSettings::default());
    let request = DispatchRequest::get(HOST, "/news.html")
        .with_binding(ControllerBinding::new("front", "archive").with_param("uri", "news.html"));
    let err = app.dispatcher.handle(&request).await.expect_err("unknown action");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

struct FriendlyNotFound;

#[async_trait]
impl Listener for FriendlyNotFound {
    fn name(&self) -> &'static str {
        "friendly-not-found"
    }

    async fn on_error(&self, event: &mut ErrorEvent<'_>) {
        if event.error().kind() == DispatchErrorKind::NotFound {
            event.set_response(DispatchResponse::new(
                StatusCode::NOT_FOUND,
                format!("nothing at {}", event.request().path()),
            ));
        }
    }
}

struct Stamp;

#[async_trait]
impl Listener for Stamp {
    fn name(&self) -> &'static str {
        "stamp"
    }

    async fn on_pre_response(&self, event: &mut ResponseEvent<'_>) {
        event
            .response_mut()
            .headers_mut()
            .insert("x-served-by", HeaderValue::from_static("quire"));
    }
}

#[tokio::test]
async fn error_listeners_can_answer_and_the_answer_is_post_processed() {
    let listeners: Vec<Arc<dyn Listener>> = vec![Arc::new(FriendlyNotFound), Arc::new(Stamp)];
    let dispatcher = dispatcher_with(listeners);

    let response = dispatcher
        .handle(&DispatchRequest::get(HOST, "/missing.html"))
        .await
        .expect("converted by listener");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.body().as_ref(), b"nothing at /missing.html");
    assert_eq!(response.headers()["x-served-by"], "quire");
}

#[tokio::test]
async fn unconverted_errors_reach_the_caller() {
    let listeners: Vec<Arc<dyn Listener>> = vec![Arc::new(Stamp)];
    let dispatcher = dispatcher_with(listeners);
    let err = dispatcher
        .handle(&DispatchRequest::get(HOST, "/missing.html"))
        .await
        .expect_err("nobody converts");
    assert_eq!(err.kind(), DispatchErrorKind::NotFound);
}

//! Administrative surface: cache flushes, content edits and page state.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::HttpError;
use crate::cache::{InvalidationReport, MutationBatch, RenderCache};
use crate::domain::types::{EntityId, PageState};
use crate::infra::graph::{ContentUpdate, MemoryGraph};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub graph: Arc<MemoryGraph>,
    pub cache: RenderCache,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_health", get(health))
        .route("/_cache/flush", post(flush))
        .route("/_cache", delete(clear))
        .route("/_content/{id}", put(update_content))
        .route("/_page/{id}", put(update_page))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Entity references accept either a UUID or a fixture key.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlushRequest {
    contents: Vec<String>,
    pages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ContentUpdated {
    content: EntityId,
    invalidation: InvalidationReport,
}

#[derive(Debug, Deserialize)]
struct PageUpdate {
    state: PageState,
}

#[derive(Debug, Serialize)]
struct PageUpdated {
    page: EntityId,
    state: PageState,
    invalidation: InvalidationReport,
}

#[derive(Debug, Serialize)]
struct Cleared {
    evicted: usize,
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn resolve(state: &AdminState, reference: &str) -> Result<EntityId, HttpError> {
    state.graph.resolve(reference).ok_or_else(|| {
        HttpError::new(
            "infra::http::admin::resolve",
            StatusCode::NOT_FOUND,
            "Resource not found",
            format!("no entity is known as `{reference}`"),
        )
    })
}

async fn flush(State(state): State<AdminState>, Json(request): Json<FlushRequest>) -> Response {
    let mut batch = MutationBatch::new();
    for reference in &request.contents {
        match resolve(&state, reference) {
            Ok(id) => batch = batch.with_content(id),
            Err(err) => return err.into_response(),
        }
    }
    for reference in &request.pages {
        match resolve(&state, reference) {
            Ok(id) => batch = batch.with_page(id),
            Err(err) => return err.into_response(),
        }
    }

    match state.cache.propagator.flush(&batch).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn update_content(
    State(state): State<AdminState>,
    Path(reference): Path<String>,
    Json(update): Json<ContentUpdate>,
) -> Response {
    let id = match resolve(&state, &reference) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = state.graph.update_content(id, update) {
        return HttpError::from(err).into_response();
    }
    info!(content = %id, "Content updated");

    // The edit only counts as done once dependent cache entries are gone.
    match state
        .cache
        .propagator
        .flush(&MutationBatch::new().with_content(id))
        .await
    {
        Ok(invalidation) => Json(ContentUpdated {
            content: id,
            invalidation,
        })
        .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn update_page(
    State(state): State<AdminState>,
    Path(reference): Path<String>,
    Json(update): Json<PageUpdate>,
) -> Response {
    let id = match resolve(&state, &reference) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let page = match state.graph.set_page_state(id, update.state) {
        Ok(page) => page,
        Err(err) => return HttpError::from(err).into_response(),
    };
    info!(page = %id, state = ?page.state, "Page state changed");

    match state
        .cache
        .propagator
        .flush(&MutationBatch::new().with_page(id))
        .await
    {
        Ok(invalidation) => Json(PageUpdated {
            page: id,
            state: page.state,
            invalidation,
        })
        .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn clear(State(state): State<AdminState>) -> Response {
    match state.cache.clear() {
        Ok(evicted) => {
            info!(evicted, "Render cache cleared");
            Json(Cleared { evicted }).into_response()
        }
        Err(err) => HttpError::from_error(
            "infra::http::admin::clear",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache clear failed",
            &err,
        )
        .into_response(),
    }
}

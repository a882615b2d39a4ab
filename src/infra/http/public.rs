use std::sync::Arc;

use axum::{
    Router,
    extract::{OriginalUri, State},
    http::{HeaderMap, Method, header::HOST},
    middleware,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::application::dispatch::{DispatchRequest, Dispatcher};

use super::middleware::{log_responses, set_request_context};

/// Header carrying the preview token that lifts offline visibility.
pub const PREVIEW_TOKEN_HEADER: &str = "x-quire-preview";

const FALLBACK_HOST: &str = "localhost";

#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub preview_token: Option<Arc<str>>,
}

impl HttpState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            preview_token: None,
        }
    }

    pub fn with_preview_token(mut self, token: Option<String>) -> Self {
        self.preview_token = token.map(Arc::from);
        self
    }

    fn is_elevated(&self, headers: &HeaderMap) -> bool {
        let (Some(expected), Some(presented)) = (
            self.preview_token.as_deref(),
            headers.get(PREVIEW_TOKEN_HEADER),
        ) else {
            return false;
        };
        bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
    }
}

/// Every public path goes through the dispatch pipeline.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn dispatch(
    State(state): State<HttpState>,
    method: Method,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(FALLBACK_HOST);
    let target = uri
        .path_and_query()
        .map(|target| target.as_str())
        .unwrap_or("/");

    let request =
        DispatchRequest::new(method, host, target).with_elevated(state.is_elevated(&headers));

    match state.dispatcher.handle(&request).await {
        Ok(response) => {
            let dispatcher = state.dispatcher.clone();
            let transmitted = response.clone();
            tokio::spawn(async move {
                dispatcher.terminate(&request, &transmitted).await;
            });
            response.into_response()
        }
        Err(err) => err.into_response(),
    }
}

use std::collections::BTreeMap;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use url::Url;

use crate::application::error::DispatchError;

/// Controller and action a request is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerBinding {
    pub controller: String,
    pub action: String,
    pub params: BTreeMap<String, String>,
}

impl ControllerBinding {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Transport-independent view of an inbound request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    method: Method,
    scheme: String,
    host: String,
    path: String,
    query: Option<String>,
    binding: Option<ControllerBinding>,
    elevated: bool,
}

impl DispatchRequest {
    /// `target` is the path plus optional query, e.g. `/about.html?lang=fr`.
    pub fn new(method: Method, host: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, (!query.is_empty()).then(|| query.to_string())),
            None => (target, None),
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            method,
            scheme: "http".to_string(),
            host: host.into(),
            path,
            query,
            binding: None,
            elevated: false,
        }
    }

    pub fn get(host: impl Into<String>, target: &str) -> Self {
        Self::new(Method::GET, host, target)
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Binds the request to a controller ahead of route matching.
    pub fn with_binding(mut self, binding: ControllerBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Marks the requester as holding an elevated session.
    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn binding(&self) -> Option<&ControllerBinding> {
        self.binding.as_ref()
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Scheme and host lower-cased, default port dropped, query pairs sorted.
    pub fn canonical_uri(&self) -> String {
        let raw = format!("{}://{}{}", self.scheme, self.host, self.path);
        let Ok(mut url) = Url::parse(&raw) else {
            return raw.to_ascii_lowercase();
        };
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = self
            .query
            .as_deref()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url.into()
    }
}

/// Response produced by an action, before it is handed to the transport.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl DispatchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    /// `301 Moved Permanently` that intermediaries must not cache.
    pub fn permanent_redirect(location: &str) -> Result<Self, DispatchError> {
        let location = HeaderValue::from_str(location).map_err(|err| {
            DispatchError::internal(format!("redirect target `{location}` is not a valid header"))
                .with_source(err)
        })?;
        Ok(Self::new(StatusCode::MOVED_PERMANENTLY, Bytes::new())
            .with_header(header::LOCATION, location)
            .with_header(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store, no-cache, must-revalidate"),
            )
            .with_header(
                header::EXPIRES,
                HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
            ))
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

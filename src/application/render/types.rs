use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::application::repos::RepoError;
use crate::domain::entities::RenderTarget;
use crate::domain::types::{EntityId, EntityKind};

/// Everything besides the entity that a render depends on.
///
/// Passed explicitly down the render call chain; nested renders receive the
/// same context as the page that embeds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    mode: String,
    params: BTreeMap<String, String>,
    request_uri: Option<String>,
    elevated: bool,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MODE)
    }
}

impl RenderContext {
    pub const DEFAULT_MODE: &'static str = "default";

    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            params: BTreeMap::new(),
            request_uri: None,
            elevated: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Canonical URI of the request that triggered the render.
    pub fn with_request_uri(mut self, uri: impl Into<String>) -> Self {
        self.request_uri = Some(uri.into());
        self
    }

    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Stable summary of the auxiliary parameters, in key order.
    pub fn fingerprint(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Output of an already rendered child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: EntityId,
    pub body: Bytes,
}

/// What a renderer receives for one entity.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub target: &'a RenderTarget,
    pub context: &'a RenderContext,
    /// Direct children in display order.
    pub children: &'a [Fragment],
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no renderer registered for {kind} entities")]
    MissingRenderer { kind: EntityKind },
    #[error("{kind} `{id}` does not exist")]
    MissingEntity { kind: EntityKind, id: EntityId },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("renderer `{renderer}` failed: {message}")]
    Renderer { renderer: String, message: String },
    #[error("content `{id}` is nested too deeply; the graph may contain a cycle")]
    Cycle { id: EntityId },
}

impl RenderError {
    pub fn renderer(renderer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Renderer {
            renderer: renderer.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_ordered_by_key() {
        let context = RenderContext::new("rss")
            .with_param("page", "2")
            .with_param("lang", "fr");
        assert_eq!(context.fingerprint(), "lang=fr&page=2");
        assert_eq!(context.mode(), "rss");
        assert_eq!(RenderContext::default().fingerprint(), "");
        assert_eq!(RenderContext::default().mode(), "default");
    }
}

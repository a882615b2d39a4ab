//! Decides whether a render may be served from or written to a cache.

use url::Url;

use crate::application::render::RenderContext;
use crate::domain::entities::{ContentRecord, PageRecord, Renderable};

use super::config::CacheConfig;

/// Rule set consulted on every pre-render and post-render event.
///
/// Evaluation is pure; nothing here is memoised.
#[derive(Debug, Clone)]
pub struct ValidityPolicy {
    config: CacheConfig,
}

impl ValidityPolicy {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether a content fragment may be cached at its own level.
    ///
    /// A node that is a top-level column of some page wraps independently
    /// rendered children and is never cached itself, whatever the settings.
    pub fn is_content_cacheable(&self, content: &ContentRecord, context: &RenderContext) -> bool {
        if content.is_page_column() {
            return false;
        }
        self.config.enable_content_cache
            && self.allows_requester(context)
            && self.allows_status(content)
    }

    /// Whether the page at `canonical_uri` may be cached for this request.
    pub fn is_page_cacheable(&self, canonical_uri: &str, context: &RenderContext) -> bool {
        if !self.config.enable_page_cache || !self.allows_requester(context) {
            return false;
        }
        let Ok(url) = Url::parse(canonical_uri) else {
            return false;
        };
        if url.query().is_some() && !self.config.cache_query_strings {
            return false;
        }
        let path = url.path();
        !self
            .config
            .excluded_page_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Entity-level checks applied on top of [`Self::is_page_cacheable`].
    pub fn allows_page(&self, page: &PageRecord) -> bool {
        if self.config.skip_offline && !page.is_online() {
            return false;
        }
        self.allows_status(page)
    }

    fn allows_requester(&self, context: &RenderContext) -> bool {
        !(self.config.skip_authenticated && context.is_elevated())
    }

    fn allows_status(&self, entity: &impl Renderable) -> bool {
        !self.config.respect_cache_status || entity.cache_enabled()
    }
}

//! Cache configuration.
//!
//! Controls the content fragment cache and the page cache via `quire.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_CONTENT_CAPACITY: usize = 2048;
const DEFAULT_PAGE_CAPACITY: usize = 512;

/// Cache configuration from the `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache rendered content fragments.
    pub enable_content_cache: bool,
    /// Cache rendered pages by request URI.
    pub enable_page_cache: bool,
    /// Maximum entries in the content store.
    pub content_capacity: usize,
    /// Maximum entries in the page store.
    pub page_capacity: usize,
    /// Never serve or store cached output for elevated (authenticated) requests.
    pub skip_authenticated: bool,
    /// Never cache pages that are not online.
    pub skip_offline: bool,
    /// Honour the per-entity cache-status flag.
    pub respect_cache_status: bool,
    /// Request paths starting with any of these prefixes bypass the page cache.
    pub excluded_page_prefixes: Vec<String>,
    /// Allow caching of pages requested with a query string.
    pub cache_query_strings: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_content_cache: true,
            enable_page_cache: true,
            content_capacity: DEFAULT_CONTENT_CAPACITY,
            page_capacity: DEFAULT_PAGE_CAPACITY,
            skip_authenticated: true,
            skip_offline: true,
            respect_cache_status: true,
            excluded_page_prefixes: Vec::new(),
            cache_query_strings: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enable_content_cache: settings.enable_content_cache,
            enable_page_cache: settings.enable_page_cache,
            content_capacity: settings.content_capacity,
            page_capacity: settings.page_capacity,
            skip_authenticated: settings.skip_authenticated,
            skip_offline: settings.skip_offline,
            respect_cache_status: settings.respect_cache_status,
            excluded_page_prefixes: settings.excluded_page_prefixes.clone(),
            cache_query_strings: settings.cache_query_strings,
        }
    }
}

impl CacheConfig {
    /// Returns true if any cache layer is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enable_content_cache || self.enable_page_cache
    }

    /// Content capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn content_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.content_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Page capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn page_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.page_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

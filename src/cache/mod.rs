//! Quire render cache
//!
//! Two tag-indexed stores sit behind the render pipeline:
//!
//! - **content**: rendered content fragments, keyed by entity, mode and renderer
//! - **page**: rendered pages, keyed by canonical request URI
//!
//! The [`CacheListener`] fills and serves both stores from render events; the
//! [`InvalidationPropagator`] empties them when entities change.
//!
//! ```toml
//! [cache]
//! enable_content_cache = true
//! enable_page_cache = true
//! content_capacity = 2048
//! # ... see config.rs for all options
//! ```

mod config;
mod events;
mod keys;
mod lifetime;
mod listener;
mod lock;
mod planner;
mod policy;
mod propagator;
mod store;

use std::sync::Arc;
use std::time::Instant;

pub use config::CacheConfig;
pub use events::{Epoch, MutationBatch};
pub use keys::{CacheKey, content_key, page_key};
pub use lifetime::{LifetimeError, LifetimeResolver, shortest};
pub use listener::CacheListener;
pub use planner::InvalidationPlan;
pub use policy::ValidityPolicy;
pub use propagator::{FlushError, InvalidationPropagator, InvalidationReport};
pub use store::{CacheError, CacheStore, CacheWrite, MemoryStore, PutOutcome};

pub(crate) use lock::{rw_read, rw_write};

use crate::application::repos::EntityGraph;

/// Metric names emitted by the cache, for `describe_*` registration.
pub mod metric_names {
    pub use super::listener::{
        METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_STORE_REJECTED_TOTAL,
        METRIC_CACHE_STORE_TOTAL,
    };
    pub use super::propagator::{METRIC_CACHE_BACKEND_ERROR_TOTAL, METRIC_CACHE_FLUSH_MS};
    pub use super::store::METRIC_CACHE_EVICT_TOTAL;
}

/// Both stores plus the components wired around them.
#[derive(Clone)]
pub struct RenderCache {
    pub contents: Arc<dyn CacheStore>,
    pub pages: Arc<dyn CacheStore>,
    pub listener: Arc<CacheListener>,
    pub propagator: InvalidationPropagator,
    memory: Vec<Arc<MemoryStore>>,
}

impl RenderCache {
    /// In-process stores sized from `config`.
    pub fn in_memory(config: &CacheConfig, graph: Arc<dyn EntityGraph>) -> Self {
        let contents = Arc::new(MemoryStore::new(
            "content",
            config.content_capacity_non_zero(),
        ));
        let pages = Arc::new(MemoryStore::new("page", config.page_capacity_non_zero()));
        let mut cache = Self::with_stores(config, graph, contents.clone(), pages.clone());
        cache.memory = vec![contents, pages];
        cache
    }

    /// Wires the listener and propagator around caller-supplied stores.
    pub fn with_stores(
        config: &CacheConfig,
        graph: Arc<dyn EntityGraph>,
        contents: Arc<dyn CacheStore>,
        pages: Arc<dyn CacheStore>,
    ) -> Self {
        let lifetimes = LifetimeResolver::new(graph.clone(), contents.clone());
        let listener = Arc::new(CacheListener::new(
            graph.clone(),
            ValidityPolicy::new(config.clone()),
            contents.clone(),
            pages.clone(),
            lifetimes,
        ));
        let propagator = InvalidationPropagator::new(graph, contents.clone(), pages.clone());
        Self {
            contents,
            pages,
            listener,
            propagator,
            memory: Vec::new(),
        }
    }

    /// Drops expired entries from in-process stores; returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.memory
            .iter()
            .map(|store| store.purge_expired(now))
            .sum()
    }

    /// Empties both stores.
    pub fn clear(&self) -> Result<usize, CacheError> {
        Ok(self.contents.clear()? + self.pages.clear()?)
    }
}

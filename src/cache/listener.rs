//! Render-event listener serving and storing cached output.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::application::events::{Listener, RenderEvent};
use crate::application::repos::EntityGraph;
use crate::domain::entities::{ContentRecord, PageRecord, RenderTarget, Renderable};
use crate::domain::types::EntityId;

use super::keys::{CacheKey, content_key, page_key};
use super::lifetime::LifetimeResolver;
use super::policy::ValidityPolicy;
use super::propagator::METRIC_CACHE_BACKEND_ERROR_TOTAL;
use super::store::{CacheStore, CacheWrite, PutOutcome};

pub const METRIC_CACHE_HIT_TOTAL: &str = "quire_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "quire_cache_miss_total";
pub const METRIC_CACHE_STORE_TOTAL: &str = "quire_cache_store_total";
pub const METRIC_CACHE_STORE_REJECTED_TOTAL: &str = "quire_cache_store_rejected_total";

/// Serves cached renders on pre-render and stores fresh ones on post-render.
///
/// Store failures never fail a render: a failed lookup is a miss and a
/// failed write is logged and dropped.
pub struct CacheListener {
    graph: Arc<dyn EntityGraph>,
    policy: ValidityPolicy,
    contents: Arc<dyn CacheStore>,
    pages: Arc<dyn CacheStore>,
    lifetimes: LifetimeResolver,
}

/// Where a render target lives in the cache, when it is cacheable at all.
struct Slot<'a> {
    store: &'a dyn CacheStore,
    key: CacheKey,
}

impl CacheListener {
    pub fn new(
        graph: Arc<dyn EntityGraph>,
        policy: ValidityPolicy,
        contents: Arc<dyn CacheStore>,
        pages: Arc<dyn CacheStore>,
        lifetimes: LifetimeResolver,
    ) -> Self {
        Self {
            graph,
            policy,
            contents,
            pages,
            lifetimes,
        }
    }

    fn slot(&self, event: &RenderEvent) -> Option<Slot<'_>> {
        match event.target() {
            RenderTarget::Content(content) => self.content_slot(content, event),
            RenderTarget::Page(page) => self.page_slot(page, event),
        }
    }

    fn content_slot(&self, content: &ContentRecord, event: &RenderEvent) -> Option<Slot<'_>> {
        if !self.policy.is_content_cacheable(content, event.context()) {
            return None;
        }
        Some(Slot {
            store: self.contents.as_ref(),
            key: content_key(
                content.id,
                event.context().mode(),
                event.renderer(),
                event.fingerprint(),
            ),
        })
    }

    fn page_slot(&self, page: &PageRecord, event: &RenderEvent) -> Option<Slot<'_>> {
        let uri = event.context().request_uri()?;
        if !self.policy.allows_page(page) || !self.policy.is_page_cacheable(uri, event.context()) {
            return None;
        }
        Some(Slot {
            store: self.pages.as_ref(),
            key: page_key(uri),
        })
    }

    /// Re-reads the target after stamping: the rendered record must be no
    /// older than the stamp, or a completed flush could be undone.
    async fn refresh_target(&self, event: &mut RenderEvent, layer: &'static str) {
        let id = event.target().identity();
        let fresh = match event.target() {
            RenderTarget::Content(_) => self
                .graph
                .content(id)
                .await
                .map(|found| found.map(RenderTarget::Content)),
            RenderTarget::Page(_) => self
                .graph
                .page(id)
                .await
                .map(|found| found.map(RenderTarget::Page)),
        };
        match fresh {
            Ok(Some(target)) => {
                if !event.refresh_target(target) {
                    event.clear_stamp();
                }
            }
            Ok(None) => {
                debug!(
                    cache = layer,
                    entity = %id,
                    "Render target vanished; output will not be stored"
                );
                event.clear_stamp();
            }
            Err(err) => {
                warn!(
                    cache = layer,
                    entity = %id,
                    error = %err,
                    "Render target could not be re-read; output will not be stored"
                );
                event.clear_stamp();
            }
        }
    }

    async fn lifetime_for(&self, target: &RenderTarget) -> Option<u64> {
        let resolved = match target {
            RenderTarget::Content(content) => {
                self.lifetimes
                    .resolve_content_lifetime(content.id, content.cache_lifetime)
                    .await
            }
            RenderTarget::Page(page) => self.lifetimes.resolve_page_lifetime(page).await,
        };
        resolved
            .inspect_err(|err| warn!(error = %err, "Cache lifetime could not be resolved"))
            .ok()
    }
}

/// Tags of a cached entry: the entity itself plus, for pages, its columns.
fn tags_for(target: &RenderTarget) -> BTreeSet<EntityId> {
    match target {
        RenderTarget::Content(content) => BTreeSet::from([content.id]),
        RenderTarget::Page(page) => std::iter::once(page.id)
            .chain(page.columns.iter().copied())
            .collect(),
    }
}

fn backend_error(layer: &'static str, op: &'static str) {
    counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL, "layer" => layer, "op" => op).increment(1);
}

#[async_trait]
impl Listener for CacheListener {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn on_pre_render(&self, event: &mut RenderEvent) {
        let Some(slot) = self.slot(event) else {
            return;
        };
        let layer = slot.store.layer();

        match slot.store.epoch() {
            Ok(epoch) => event.set_stamp(epoch),
            Err(err) => {
                backend_error(layer, "epoch");
                warn!(cache = layer, error = %err, "Cache epoch unavailable; treating as miss");
                return;
            }
        }

        match slot.store.get(&slot.key) {
            Ok(Some(payload)) => {
                counter!(METRIC_CACHE_HIT_TOTAL, "layer" => layer).increment(1);
                debug!(cache = layer, key = %slot.key, outcome = "hit", "Cache lookup");
                event.serve_cached(payload);
                return;
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS_TOTAL, "layer" => layer).increment(1);
                debug!(cache = layer, key = %slot.key, outcome = "miss", "Cache lookup");
            }
            Err(err) => {
                backend_error(layer, "get");
                counter!(METRIC_CACHE_MISS_TOTAL, "layer" => layer).increment(1);
                warn!(
                    cache = layer,
                    key = %slot.key,
                    error = %err,
                    "Cache lookup failed; rendering live"
                );
            }
        }
        self.refresh_target(event, layer).await;
    }

    async fn on_post_render(&self, event: &mut RenderEvent) {
        // A missing stamp means pre-render declined or could not reach the store.
        let (Some(observed), Some(output)) = (event.stamp(), event.output().cloned()) else {
            return;
        };
        let Some(slot) = self.slot(event) else {
            return;
        };
        let layer = slot.store.layer();
        let Some(lifetime) = self.lifetime_for(event.target()).await else {
            return;
        };

        let write = CacheWrite {
            key: slot.key,
            payload: output,
            lifetime,
            tags: tags_for(event.target()),
            observed: Some(observed),
        };
        let key = write.key.clone();
        match slot.store.put_entry(write) {
            Ok(PutOutcome::Stored) => {
                counter!(METRIC_CACHE_STORE_TOTAL, "layer" => layer).increment(1);
                debug!(cache = layer, key = %key, lifetime, "Cache entry stored");
            }
            Ok(PutOutcome::Rejected) => {
                counter!(METRIC_CACHE_STORE_REJECTED_TOTAL, "layer" => layer).increment(1);
                debug!(cache = layer, key = %key, "Stale render dropped after concurrent eviction");
            }
            Err(err) => {
                backend_error(layer, "put");
                warn!(
                    cache = layer,
                    key = %key,
                    error = %err,
                    "Cache write failed; response unaffected"
                );
            }
        }
    }
}

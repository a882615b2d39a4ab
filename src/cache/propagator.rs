//! Executes invalidation plans against the content and page stores.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::application::repos::{EntityGraph, RepoError};
use crate::domain::types::EntityId;

use super::events::MutationBatch;
use super::planner::InvalidationPlan;
use super::store::{CacheError, CacheStore};

pub const METRIC_CACHE_FLUSH_MS: &str = "quire_cache_flush_ms";
pub const METRIC_CACHE_BACKEND_ERROR_TOTAL: &str = "quire_cache_backend_error_total";

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to expand mutation batch: {0}")]
    Graph(#[from] RepoError),
    /// Every planned eviction was attempted; `failed` of them did not go through.
    #[error("{failed} cache eviction(s) failed; first: {first}")]
    Incomplete {
        failed: usize,
        report: InvalidationReport,
        #[source]
        first: CacheError,
    },
}

/// What one flush removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub batch_id: Uuid,
    pub content_tags: usize,
    pub page_tags: usize,
    pub content_evicted: usize,
    pub page_evicted: usize,
    pub failed_evictions: usize,
}

/// Evicts every cached artifact embedding a mutated entity.
///
/// Returns only once all evictions are visible, so the mutating caller can
/// treat a successful return as "the cache no longer serves old data". A
/// failing store does not stop evictions in the other one.
#[derive(Clone)]
pub struct InvalidationPropagator {
    graph: Arc<dyn EntityGraph>,
    contents: Arc<dyn CacheStore>,
    pages: Arc<dyn CacheStore>,
}

impl InvalidationPropagator {
    pub fn new(
        graph: Arc<dyn EntityGraph>,
        contents: Arc<dyn CacheStore>,
        pages: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            graph,
            contents,
            pages,
        }
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id))]
    pub async fn flush(&self, batch: &MutationBatch) -> Result<InvalidationReport, FlushError> {
        let started_at = Instant::now();
        let plan = InvalidationPlan::build(self.graph.as_ref(), batch).await?;
        info!(plan = %plan, "Cache flush starting");

        let mut session = FlushSession::new(batch.id);
        self.execute(&plan, &mut session);

        histogram!(METRIC_CACHE_FLUSH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        session.finish()
    }

    fn execute(&self, plan: &InvalidationPlan, session: &mut FlushSession) {
        for tag in &plan.content_tags {
            session.evict_content(self.contents.as_ref(), *tag);
        }
        for page in &plan.owning_pages {
            session.evict_page(self.pages.as_ref(), *page);
        }
        session.flush_mutated_pages(self.pages.as_ref(), &plan.mutated_pages);
    }
}

/// Per-batch bookkeeping guaranteeing each tag is evicted at most once.
struct FlushSession {
    report: InvalidationReport,
    contents_done: HashSet<EntityId>,
    pages_done: HashSet<EntityId>,
    page_flush_done: bool,
    first_failure: Option<CacheError>,
}

impl FlushSession {
    fn new(batch_id: Uuid) -> Self {
        Self {
            report: InvalidationReport {
                batch_id,
                ..InvalidationReport::default()
            },
            contents_done: HashSet::new(),
            pages_done: HashSet::new(),
            page_flush_done: false,
            first_failure: None,
        }
    }

    fn evict_content(&mut self, store: &dyn CacheStore, tag: EntityId) {
        if !self.contents_done.insert(tag) {
            return;
        }
        self.report.content_tags += 1;
        if let Some(evicted) = self.attempt(store, tag) {
            self.report.content_evicted += evicted;
        }
    }

    fn evict_page(&mut self, store: &dyn CacheStore, tag: EntityId) {
        if !self.pages_done.insert(tag) {
            return;
        }
        self.report.page_tags += 1;
        if let Some(evicted) = self.attempt(store, tag) {
            self.report.page_evicted += evicted;
        }
    }

    fn flush_mutated_pages(&mut self, store: &dyn CacheStore, pages: &[EntityId]) {
        if self.page_flush_done || pages.is_empty() {
            return;
        }
        for page in pages {
            self.evict_page(store, *page);
        }
        self.page_flush_done = true;
    }

    fn attempt(&mut self, store: &dyn CacheStore, tag: EntityId) -> Option<usize> {
        match store.evict_by_tag(tag) {
            Ok(evicted) => Some(evicted),
            Err(err) => {
                counter!(
                    METRIC_CACHE_BACKEND_ERROR_TOTAL,
                    "layer" => store.layer(),
                    "op" => "evict_by_tag"
                )
                .increment(1);
                warn!(cache = store.layer(), tag = %tag, error = %err, "Cache eviction failed");
                self.report.failed_evictions += 1;
                self.first_failure.get_or_insert(err);
                None
            }
        }
    }

    fn finish(self) -> Result<InvalidationReport, FlushError> {
        let report = self.report;
        match self.first_failure {
            None => {
                info!(
                    content_evicted = report.content_evicted,
                    page_evicted = report.page_evicted,
                    "Cache flush complete"
                );
                Ok(report)
            }
            Some(first) => {
                error!(
                    failed = report.failed_evictions,
                    content_evicted = report.content_evicted,
                    page_evicted = report.page_evicted,
                    "Cache flush incomplete"
                );
                Err(FlushError::Incomplete {
                    failed: report.failed_evictions,
                    report,
                    first,
                })
            }
        }
    }
}

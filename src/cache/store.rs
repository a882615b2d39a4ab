//! Tag-indexed cache stores.
//!
//! Entries carry a lifetime and the set of entity ids they depend on; evicting
//! any one of those tags removes the whole entry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use crate::domain::types::EntityId;

use super::events::Epoch;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

pub const METRIC_CACHE_EVICT_TOTAL: &str = "quire_cache_evict_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{layer} cache store is unavailable")]
    Unavailable { layer: &'static str },
    #[error("{layer} cache store failed during {op}: {message}")]
    Backend {
        layer: &'static str,
        op: &'static str,
        message: String,
    },
}

/// One write request.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: CacheKey,
    pub payload: Bytes,
    /// Seconds; `0` keeps the entry until it is evicted.
    pub lifetime: u64,
    pub tags: BTreeSet<EntityId>,
    /// Store epoch observed before the payload was produced.
    pub observed: Option<Epoch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A tag of the write was evicted after the observed epoch.
    Rejected,
}

/// Key/value store with per-entry lifetime and tag associations.
///
/// Implementations must make `put_entry` and `evict_by_tag` linearizable: a
/// write observed before an eviction of one of its tags is never visible
/// after that eviction returns.
pub trait CacheStore: Send + Sync {
    /// Label used in logs and metrics, e.g. `content` or `page`.
    fn layer(&self) -> &'static str;

    fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError>;

    fn put(
        &self,
        key: CacheKey,
        payload: Bytes,
        lifetime: u64,
        tags: BTreeSet<EntityId>,
    ) -> Result<(), CacheError> {
        self.put_entry(CacheWrite {
            key,
            payload,
            lifetime,
            tags,
            observed: None,
        })
        .map(|_| ())
    }

    fn put_entry(&self, write: CacheWrite) -> Result<PutOutcome, CacheError>;

    /// Removes every entry carrying `tag`; returns how many were removed.
    fn evict_by_tag(&self, tag: EntityId) -> Result<usize, CacheError>;

    /// Smallest positive remaining lifetime among live entries tagged with
    /// any of `tags`. Entries kept forever count only when nothing else is
    /// live, in which case the result is `0`. Without live entries the result
    /// is `fallback`.
    fn min_lifetime_among(&self, tags: &[EntityId], fallback: u64) -> Result<u64, CacheError>;

    fn epoch(&self) -> Result<Epoch, CacheError>;

    /// Drops all entries; returns how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Bytes,
    tags: BTreeSet<EntityId>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    /// Whole seconds left, rounded up; `0` for entries without expiry.
    fn remaining_secs(&self, now: Instant) -> u64 {
        match self.expires_at {
            None => 0,
            Some(at) => {
                let left = at.saturating_duration_since(now);
                left.as_secs() + u64::from(left.subsec_nanos() > 0)
            }
        }
    }
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    by_tag: HashMap<EntityId, HashSet<CacheKey>>,
    evicted_at: HashMap<EntityId, Epoch>,
    /// Writes observed before this epoch are rejected outright.
    floor: Epoch,
    epoch: Epoch,
}

impl Inner {
    fn unindex(&mut self, key: &CacheKey, tags: &BTreeSet<EntityId>) {
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.unindex(key, &entry.tags);
        Some(entry)
    }

    fn is_stale(&self, write: &CacheWrite) -> bool {
        let Some(observed) = write.observed else {
            return false;
        };
        observed < self.floor
            || write
                .tags
                .iter()
                .any(|tag| self.evicted_at.get(tag).is_some_and(|at| *at > observed))
    }

    fn advance(&mut self) -> Epoch {
        self.epoch += 1;
        self.epoch
    }
}

/// In-process [`CacheStore`] bounded by an LRU capacity.
pub struct MemoryStore {
    layer: &'static str,
    tombstone_limit: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(layer: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            layer,
            tombstone_limit: capacity.get().saturating_mul(4),
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                by_tag: HashMap::new(),
                evicted_at: HashMap::new(),
                floor: 0,
                epoch: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries whose lifetime ended before `now`.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut inner = mutex_lock(&self.inner, SOURCE, "purge_expired");
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_CACHE_EVICT_TOTAL, "layer" => self.layer, "reason" => "expired")
                .increment(expired.len() as u64);
        }
        expired.len()
    }

    fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Bytes> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "get");
        let live = inner.entries.get(key).map(|entry| entry.is_live(now))?;
        if live {
            return inner.entries.get(key).map(|entry| entry.payload.clone());
        }
        inner.remove(key);
        counter!(METRIC_CACHE_EVICT_TOTAL, "layer" => self.layer, "reason" => "expired")
            .increment(1);
        None
    }

    fn put_at(&self, write: CacheWrite, now: Instant) -> PutOutcome {
        let mut inner = mutex_lock(&self.inner, SOURCE, "put");
        if inner.is_stale(&write) {
            return PutOutcome::Rejected;
        }

        let CacheWrite {
            key,
            payload,
            lifetime,
            tags,
            ..
        } = write;

        inner.remove(&key);
        for tag in &tags {
            inner.by_tag.entry(*tag).or_default().insert(key.clone());
        }
        let entry = Entry {
            payload,
            tags,
            expires_at: (lifetime > 0).then(|| now + Duration::from_secs(lifetime)),
        };
        if let Some((evicted_key, evicted)) = inner.entries.push(key, entry) {
            inner.unindex(&evicted_key, &evicted.tags);
            debug!(layer = self.layer, key = %evicted_key, "Cache entry evicted for capacity");
            counter!(METRIC_CACHE_EVICT_TOTAL, "layer" => self.layer, "reason" => "capacity")
                .increment(1);
        }
        PutOutcome::Stored
    }

    fn min_lifetime_at(&self, tags: &[EntityId], fallback: u64, now: Instant) -> u64 {
        let inner = mutex_lock(&self.inner, SOURCE, "min_lifetime_among");
        let mut seen_forever = false;
        let mut shortest: Option<u64> = None;

        for key in tags.iter().filter_map(|tag| inner.by_tag.get(tag)).flatten() {
            let Some(entry) = inner.entries.peek(key) else {
                continue;
            };
            if !entry.is_live(now) {
                continue;
            }
            match entry.remaining_secs(now) {
                0 => seen_forever = true,
                secs => shortest = Some(shortest.map_or(secs, |current| current.min(secs))),
            }
        }

        match (shortest, seen_forever) {
            (Some(secs), _) => secs,
            (None, true) => 0,
            (None, false) => fallback,
        }
    }
}

impl CacheStore for MemoryStore {
    fn layer(&self) -> &'static str {
        self.layer
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        Ok(self.get_at(key, Instant::now()))
    }

    fn put_entry(&self, write: CacheWrite) -> Result<PutOutcome, CacheError> {
        Ok(self.put_at(write, Instant::now()))
    }

    fn evict_by_tag(&self, tag: EntityId) -> Result<usize, CacheError> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "evict_by_tag");
        let epoch = inner.advance();
        inner.evicted_at.insert(tag, epoch);
        if inner.evicted_at.len() > self.tombstone_limit {
            inner.evicted_at.clear();
            inner.floor = epoch;
        }

        let keys = inner.by_tag.remove(&tag).unwrap_or_default();
        let mut removed = 0;
        for key in &keys {
            if inner.remove(key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            counter!(METRIC_CACHE_EVICT_TOTAL, "layer" => self.layer, "reason" => "tag")
                .increment(removed as u64);
        }
        Ok(removed)
    }

    fn min_lifetime_among(&self, tags: &[EntityId], fallback: u64) -> Result<u64, CacheError> {
        Ok(self.min_lifetime_at(tags, fallback, Instant::now()))
    }

    fn epoch(&self) -> Result<Epoch, CacheError> {
        Ok(mutex_lock(&self.inner, SOURCE, "epoch").epoch)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        let removed = inner.entries.len();
        let epoch = inner.advance();
        inner.entries.clear();
        inner.by_tag.clear();
        inner.evicted_at.clear();
        inner.floor = epoch;
        Ok(removed)
    }
}

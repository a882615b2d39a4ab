//! Cache key derivation.
//!
//! Content fragments are keyed by identity, render mode and renderer; pages
//! are keyed by their canonical request URI.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::types::EntityId;

const CONTENT_DOMAIN: &[u8] = b"content";
const CONTENT_PREFIX: &str = "_content_";

/// Key of one entry in a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a rendered content fragment.
///
/// `fingerprint` summarises any auxiliary render parameters the renderer
/// depends on; pass an empty string when there are none.
pub fn content_key(id: EntityId, mode: &str, renderer: &str, fingerprint: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(CONTENT_DOMAIN);
    for part in [
        id.as_uuid().as_bytes().as_slice(),
        mode.as_bytes(),
        renderer.as_bytes(),
        fingerprint.as_bytes(),
    ] {
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let cache_id = hex::encode(hasher.finalize().as_slice());

    let mut outer = Sha256::new();
    outer.update(CONTENT_PREFIX.as_bytes());
    outer.update(cache_id.as_bytes());
    CacheKey(hex::encode(outer.finalize().as_slice()))
}

/// Key of a rendered page. The URI must already be canonical.
pub fn page_key(canonical_uri: &str) -> CacheKey {
    CacheKey(canonical_uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_keys_are_deterministic() {
        let id = EntityId::new();
        let first = content_key(id, "default", "outline", "");
        let second = content_key(id, "default", "outline", "");
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn every_component_changes_the_key() {
        let id = EntityId::new();
        let base = content_key(id, "default", "outline", "");
        assert_ne!(base, content_key(id, "rss", "outline", ""));
        assert_ne!(base, content_key(id, "default", "other", ""));
        assert_ne!(base, content_key(id, "default", "outline", "page=2"));
        assert_ne!(base, content_key(EntityId::new(), "default", "outline", ""));
    }

    #[test]
    fn component_boundaries_matter() {
        let id = EntityId::new();
        assert_ne!(
            content_key(id, "ab", "c", ""),
            content_key(id, "a", "bc", "")
        );
    }

    #[test]
    fn page_key_is_the_uri() {
        let key = page_key("http://example.test/about.html");
        assert_eq!(key.as_str(), "http://example.test/about.html");
        assert_eq!(key.to_string(), "http://example.test/about.html");
    }
}

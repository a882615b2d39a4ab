//! In-memory entity graph loaded from a TOML site fixture.
//!
//! ```toml
//! [site]
//! label = "Demo"
//! default_extension = "html"
//!
//! [[pages]]
//! key = "home"
//! uri = "/"
//! title = "Home"
//! columns = ["home-main"]
//!
//! [[contents]]
//! key = "home-main"
//! class_name = "content_set"
//! children = ["welcome"]
//!
//! [[contents]]
//! key = "welcome"
//! body = "Hello"
//! cache_lifetime = 300
//! ```
//!
//! Entries are addressed by their `key` handle inside the fixture; an explicit
//! `id` (UUID) may be given, otherwise one is generated at load time.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::application::repos::{EntityGraph, RepoError};
use crate::cache::{rw_read, rw_write};
use crate::domain::entities::{ContentRecord, PageRecord, SiteRecord};
use crate::domain::error::DomainError;
use crate::domain::types::{EntityId, EntityKind, PageState};

use super::error::InfraError;

const ROOT_PAGE_URI: &str = "/";

#[derive(Debug, Deserialize)]
struct SiteFixture {
    site: SiteSection,
    #[serde(default)]
    pages: Vec<PageEntry>,
    #[serde(default)]
    contents: Vec<ContentEntry>,
}

#[derive(Debug, Deserialize)]
struct SiteSection {
    id: Option<EntityId>,
    label: String,
    #[serde(default)]
    default_extension: String,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    key: String,
    id: Option<EntityId>,
    uri: String,
    #[serde(default)]
    title: String,
    #[serde(default = "default_layout")]
    layout: String,
    #[serde(default)]
    state: PageState,
    redirect: Option<String>,
    #[serde(default)]
    use_url_redirect: bool,
    cache_lifetime: Option<u64>,
    #[serde(default = "enabled")]
    cache_enabled: bool,
    #[serde(default)]
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    key: String,
    id: Option<EntityId>,
    #[serde(default = "default_class")]
    class_name: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    children: Vec<String>,
    cache_lifetime: Option<u64>,
    #[serde(default = "enabled")]
    cache_enabled: bool,
}

fn default_layout() -> String {
    "default".to_string()
}

fn default_class() -> String {
    "text".to_string()
}

fn enabled() -> bool {
    true
}

/// Changes applied to a content node through the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContentUpdate {
    pub body: Option<String>,
    /// `Some(0)` clears the declared lifetime.
    pub cache_lifetime: Option<u64>,
    pub cache_enabled: Option<bool>,
}

impl ContentUpdate {
    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.cache_lifetime.is_none() && self.cache_enabled.is_none()
    }
}

#[derive(Debug, Default)]
struct GraphState {
    site: Option<SiteRecord>,
    pages: HashMap<EntityId, PageRecord>,
    contents: HashMap<EntityId, ContentRecord>,
    parents: HashMap<EntityId, Vec<EntityId>>,
    handles: HashMap<String, EntityId>,
}

/// Entity graph held entirely in process memory.
#[derive(Debug)]
pub struct MemoryGraph {
    site_id: EntityId,
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn from_path(path: &Path) -> Result<Self, InfraError> {
        let data = std::fs::read_to_string(path).map_err(|source| InfraError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let graph = Self::from_toml_str(&data, &path.display().to_string())?;
        info!(
            fixture = %path.display(),
            site = %graph.site_id,
            "Loaded site fixture"
        );
        Ok(graph)
    }

    /// Parses a fixture; `origin` names it in error messages.
    pub fn from_toml_str(data: &str, origin: &str) -> Result<Self, InfraError> {
        let fixture: SiteFixture =
            toml::from_str(data).map_err(|err| InfraError::fixture(origin, err.to_string()))?;
        build_state(fixture).map_err(|message| InfraError::fixture(origin, message))
    }

    pub fn site_id(&self) -> EntityId {
        self.site_id
    }

    /// Identifier registered for a fixture `key`.
    pub fn resolve_handle(&self, handle: &str) -> Option<EntityId> {
        rw_read(&self.state, "infra::graph", "resolve_handle")
            .handles
            .get(handle)
            .copied()
    }

    /// Accepts either a UUID or a fixture `key`.
    pub fn resolve(&self, reference: &str) -> Option<EntityId> {
        reference
            .parse::<EntityId>()
            .ok()
            .or_else(|| self.resolve_handle(reference))
    }

    pub fn update_content(
        &self,
        id: EntityId,
        update: ContentUpdate,
    ) -> Result<ContentRecord, DomainError> {
        let mut state = rw_write(&self.state, "infra::graph", "update_content");
        let content = state
            .contents
            .get_mut(&id)
            .ok_or_else(|| DomainError::unknown(EntityKind::Content, id))?;
        if update.is_empty() {
            return Err(DomainError::EmptyUpdate { id });
        }

        if let Some(body) = update.body {
            content.body = body;
        }
        if let Some(lifetime) = update.cache_lifetime {
            content.cache_lifetime = (lifetime > 0).then_some(lifetime);
        }
        if let Some(enabled) = update.cache_enabled {
            content.cache_enabled = enabled;
        }
        Ok(content.clone())
    }

    /// Moves a page between online, offline and deleted.
    ///
    /// Restoring a deleted page fails when another live page took its uri.
    pub fn set_page_state(
        &self,
        id: EntityId,
        page_state: PageState,
    ) -> Result<PageRecord, DomainError> {
        let mut state = rw_write(&self.state, "infra::graph", "set_page_state");
        let (uri, site_id, was_deleted) = state
            .pages
            .get(&id)
            .map(|page| (page.uri.clone(), page.site_id, page.state.is_deleted()))
            .ok_or_else(|| DomainError::unknown(EntityKind::Page, id))?;

        if was_deleted && !page_state.is_deleted() {
            let taken = state.pages.values().any(|other| {
                other.id != id
                    && other.site_id == site_id
                    && other.uri == uri
                    && !other.state.is_deleted()
            });
            if taken {
                return Err(DomainError::UriTaken { uri });
            }
        }

        let page = state
            .pages
            .get_mut(&id)
            .ok_or_else(|| DomainError::unknown(EntityKind::Page, id))?;
        page.state = page_state;
        Ok(page.clone())
    }
}

fn build_state(fixture: SiteFixture) -> Result<MemoryGraph, String> {
    let SiteFixture {
        site,
        pages,
        contents,
    } = fixture;
    let site_id = site.id.unwrap_or_default();
    let mut state = GraphState {
        site: Some(SiteRecord {
            id: site_id,
            label: site.label,
            default_extension: site.default_extension.trim_start_matches('.').to_string(),
        }),
        ..GraphState::default()
    };

    for entry in &contents {
        let id = entry.id.unwrap_or_default();
        if state.handles.insert(entry.key.clone(), id).is_some() {
            return Err(format!("duplicate key `{}`", entry.key));
        }
    }
    for entry in &pages {
        let id = entry.id.unwrap_or_default();
        if state.handles.insert(entry.key.clone(), id).is_some() {
            return Err(format!("duplicate key `{}`", entry.key));
        }
    }

    let lookup = |owner: &str, key: &str, handles: &HashMap<String, EntityId>| {
        handles
            .get(key)
            .copied()
            .ok_or_else(|| format!("`{owner}` references unknown key `{key}`"))
    };

    for entry in contents {
        let id = state.handles[&entry.key];
        let children = entry
            .children
            .iter()
            .map(|child| lookup(&entry.key, child, &state.handles))
            .collect::<Result<Vec<_>, _>>()?;
        for child in &children {
            state.parents.entry(*child).or_default().push(id);
        }
        state.contents.insert(
            id,
            ContentRecord {
                id,
                class_name: entry.class_name,
                label: entry.label,
                body: entry.body,
                children,
                cache_lifetime: entry.cache_lifetime.filter(|lifetime| *lifetime > 0),
                cache_enabled: entry.cache_enabled,
                column_of: Vec::new(),
            },
        );
    }

    let mut live_uris = HashSet::new();
    for entry in pages {
        let id = state.handles[&entry.key];
        if !entry.uri.starts_with('/') {
            return Err(format!("page `{}` uri must start with `/`", entry.key));
        }
        if !entry.state.is_deleted() && !live_uris.insert(entry.uri.clone()) {
            return Err(format!("uri `{}` is used by more than one page", entry.uri));
        }
        let columns = entry
            .columns
            .iter()
            .map(|column| lookup(&entry.key, column, &state.handles))
            .collect::<Result<Vec<_>, _>>()?;
        for column in &columns {
            let content = state
                .contents
                .get_mut(column)
                .ok_or_else(|| format!("page `{}` column must be a content node", entry.key))?;
            content.column_of.push(id);
        }
        state.pages.insert(
            id,
            PageRecord {
                id,
                site_id,
                uri: entry.uri,
                title: entry.title,
                layout: entry.layout,
                state: entry.state,
                redirect: entry.redirect,
                use_url_redirect: entry.use_url_redirect,
                cache_lifetime: entry.cache_lifetime.filter(|lifetime| *lifetime > 0),
                cache_enabled: entry.cache_enabled,
                columns,
            },
        );
    }

    if let Some(id) = find_cycle(&state.contents) {
        let key = state
            .handles
            .iter()
            .find_map(|(key, value)| (*value == id).then_some(key.as_str()))
            .unwrap_or("?");
        return Err(format!("content graph contains a cycle through `{key}`"));
    }

    Ok(MemoryGraph {
        site_id,
        state: RwLock::new(state),
    })
}

/// Depth-first search over content children; returns a node on a cycle.
fn find_cycle(contents: &HashMap<EntityId, ContentRecord>) -> Option<EntityId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: HashMap<EntityId, Mark> = HashMap::new();
    for start in contents.keys() {
        if marks.contains_key(start) {
            continue;
        }
        let mut stack = vec![(*start, 0usize)];
        marks.insert(*start, Mark::Open);
        while let Some((node, index)) = stack.pop() {
            let children = contents
                .get(&node)
                .map(|content| content.children.as_slice())
                .unwrap_or_default();
            match children.get(index) {
                Some(child) => {
                    stack.push((node, index + 1));
                    match marks.get(child) {
                        Some(Mark::Open) => return Some(*child),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(*child, Mark::Open);
                            stack.push((*child, 0));
                        }
                    }
                }
                None => {
                    marks.insert(node, Mark::Done);
                }
            }
        }
    }
    None
}

#[async_trait]
impl EntityGraph for MemoryGraph {
    async fn site(&self, id: EntityId) -> Result<Option<SiteRecord>, RepoError> {
        let state = rw_read(&self.state, "infra::graph", "site");
        Ok(state.site.clone().filter(|site| site.id == id))
    }

    async fn page(&self, id: EntityId) -> Result<Option<PageRecord>, RepoError> {
        Ok(rw_read(&self.state, "infra::graph", "page")
            .pages
            .get(&id)
            .cloned())
    }

    async fn content(&self, id: EntityId) -> Result<Option<ContentRecord>, RepoError> {
        Ok(rw_read(&self.state, "infra::graph", "content")
            .contents
            .get(&id)
            .cloned())
    }

    async fn direct_children(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError> {
        let state = rw_read(&self.state, "infra::graph", "direct_children");
        if let Some(content) = state.contents.get(&id) {
            return Ok(content.children.clone());
        }
        Ok(state
            .pages
            .get(&id)
            .map(|page| page.columns.clone())
            .unwrap_or_default())
    }

    async fn direct_parents(&self, id: EntityId) -> Result<Vec<EntityId>, RepoError> {
        Ok(rw_read(&self.state, "infra::graph", "direct_parents")
            .parents
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn owning_page(&self, id: EntityId) -> Result<Option<EntityId>, RepoError> {
        let state = rw_read(&self.state, "infra::graph", "owning_page");
        let mut seen = HashSet::new();
        let mut current = vec![id];

        for _ in 0..=crate::application::repos::MAX_GRAPH_DEPTH {
            let mut next = Vec::new();
            for node in current {
                if !seen.insert(node) {
                    continue;
                }
                if let Some(content) = state.contents.get(&node)
                    && let Some(page) = content.column_of.first()
                {
                    return Ok(Some(*page));
                }
                if let Some(parents) = state.parents.get(&node) {
                    next.extend(parents.iter().copied());
                }
            }
            if next.is_empty() {
                return Ok(None);
            }
            current = next;
        }

        Err(RepoError::DepthExceeded {
            id,
            limit: crate::application::repos::MAX_GRAPH_DEPTH,
        })
    }

    async fn root(&self, site_id: EntityId) -> Result<Option<PageRecord>, RepoError> {
        self.find_by_uri(ROOT_PAGE_URI, site_id).await
    }

    async fn find_by_uri(
        &self,
        uri: &str,
        site_id: EntityId,
    ) -> Result<Option<PageRecord>, RepoError> {
        let state = rw_read(&self.state, "infra::graph", "find_by_uri");
        Ok(state
            .pages
            .values()
            .find(|page| page.site_id == site_id && page.uri == uri && !page.state.is_deleted())
            .cloned())
    }
}

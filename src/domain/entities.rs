//! Renderable entities as exposed by the entity graph.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::domain::types::{EntityId, EntityKind, PageState};

/// Capability shared by everything the render pipeline can turn into bytes.
///
/// The renderer registry dispatches on [`Renderable::kind`]; templates are
/// selected through [`Renderable::template_key`].
pub trait Renderable {
    fn identity(&self) -> EntityId;
    fn kind(&self) -> EntityKind;
    fn template_key(&self) -> Cow<'_, str>;
    /// Lifetime in seconds declared on the entity; `None` and `Some(0)` both
    /// mean "use the computed default".
    fn declared_lifetime(&self) -> Option<u64>;
    /// Per-entity cache-status flag.
    fn cache_enabled(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: EntityId,
    pub label: String,
    /// Extension expected on page URLs, without the leading dot.
    pub default_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: EntityId,
    /// Content type name, e.g. `paragraph` or `content_set`.
    pub class_name: String,
    pub label: String,
    pub body: String,
    /// Ordered direct children.
    pub children: Vec<EntityId>,
    pub cache_lifetime: Option<u64>,
    pub cache_enabled: bool,
    /// Pages that use this node as one of their top-level columns.
    pub column_of: Vec<EntityId>,
}

impl ContentRecord {
    /// A node wrapping a page body renders each of its children
    /// independently and is never cached at its own level.
    pub fn is_page_column(&self) -> bool {
        !self.column_of.is_empty()
    }
}

impl Renderable for ContentRecord {
    fn identity(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Content
    }

    fn template_key(&self) -> Cow<'_, str> {
        Cow::Owned(format!("content/{}", self.class_name))
    }

    fn declared_lifetime(&self) -> Option<u64> {
        self.cache_lifetime
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: EntityId,
    pub site_id: EntityId,
    /// Site-relative URL without extension, e.g. `/about`; the root page uses `/`.
    pub uri: String,
    pub title: String,
    pub layout: String,
    pub state: PageState,
    pub redirect: Option<String>,
    pub use_url_redirect: bool,
    pub cache_lifetime: Option<u64>,
    pub cache_enabled: bool,
    /// Top-level content nodes, in layout order.
    pub columns: Vec<EntityId>,
}

impl PageRecord {
    pub fn is_online(&self) -> bool {
        self.state.is_online()
    }

    /// Redirect target when the page is configured to answer with one.
    pub fn active_redirect(&self) -> Option<&str> {
        if self.use_url_redirect {
            self.redirect.as_deref().filter(|target| !target.is_empty())
        } else {
            None
        }
    }
}

impl Renderable for PageRecord {
    fn identity(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Page
    }

    fn template_key(&self) -> Cow<'_, str> {
        Cow::Owned(format!("page/{}", self.layout))
    }

    fn declared_lifetime(&self) -> Option<u64> {
        self.cache_lifetime
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

/// Either kind of renderable entity, owned.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTarget {
    Page(PageRecord),
    Content(ContentRecord),
}

impl RenderTarget {
    pub fn as_page(&self) -> Option<&PageRecord> {
        match self {
            RenderTarget::Page(page) => Some(page),
            RenderTarget::Content(_) => None,
        }
    }

    pub fn as_content(&self) -> Option<&ContentRecord> {
        match self {
            RenderTarget::Content(content) => Some(content),
            RenderTarget::Page(_) => None,
        }
    }

    fn inner(&self) -> &dyn Renderable {
        match self {
            RenderTarget::Page(page) => page,
            RenderTarget::Content(content) => content,
        }
    }
}

impl Renderable for RenderTarget {
    fn identity(&self) -> EntityId {
        self.inner().identity()
    }

    fn kind(&self) -> EntityKind {
        self.inner().kind()
    }

    fn template_key(&self) -> Cow<'_, str> {
        self.inner().template_key()
    }

    fn declared_lifetime(&self) -> Option<u64> {
        self.inner().declared_lifetime()
    }

    fn cache_enabled(&self) -> bool {
        self.inner().cache_enabled()
    }
}

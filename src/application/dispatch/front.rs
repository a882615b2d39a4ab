//! Default catch-all controller resolving URLs to pages.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, header};
use tracing::{info, warn};

use crate::application::error::DispatchError;
use crate::application::render::{RenderContext, RenderService};
use crate::application::repos::EntityGraph;
use crate::domain::entities::{PageRecord, SiteRecord};
use crate::domain::types::EntityId;

use super::request::{DispatchRequest, DispatchResponse};
use super::Controller;

/// URI standing for the site root page.
pub const ROOT_URI: &str = "_root_";

const RSS_MODE: &str = "rss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontSettings {
    /// Extension used when the site declares none.
    pub url_extension: String,
    /// Reject URLs that neither carry the extension nor end with `/`.
    pub force_url_extension: bool,
}

impl Default for FrontSettings {
    fn default() -> Self {
        Self {
            url_extension: "html".to_string(),
            force_url_extension: true,
        }
    }
}

/// Serves pages by URL in the default and `rss` render modes.
pub struct FrontController {
    graph: Arc<dyn EntityGraph>,
    render: RenderService,
    site_id: EntityId,
    settings: FrontSettings,
}

impl FrontController {
    pub fn new(
        graph: Arc<dyn EntityGraph>,
        render: RenderService,
        site_id: EntityId,
        settings: FrontSettings,
    ) -> Self {
        Self {
            graph,
            render,
            site_id,
            settings,
        }
    }

    async fn site(&self) -> Result<SiteRecord, DispatchError> {
        self.graph
            .site(self.site_id)
            .await
            .map_err(|err| DispatchError::internal("site lookup failed").with_source(err))?
            .ok_or_else(|| {
                DispatchError::internal(format!("site `{}` is not configured", self.site_id))
            })
    }

    fn expected_extension<'a>(&'a self, site: &'a SiteRecord) -> &'a str {
        if site.default_extension.is_empty() {
            &self.settings.url_extension
        } else {
            &site.default_extension
        }
    }

    async fn find_page(
        &self,
        site: &SiteRecord,
        stem: &str,
    ) -> Result<Option<PageRecord>, DispatchError> {
        let path = stem.trim_end_matches('/');
        let found = if stem == ROOT_URI || path.is_empty() {
            self.graph.root(site.id).await
        } else {
            self.graph.find_by_uri(&format!("/{path}"), site.id).await
        };
        found.map_err(|err| {
            DispatchError::internal(format!("page lookup for `{stem}` failed")).with_source(err)
        })
    }

    /// Offline pages exist only for elevated requesters.
    fn visible(page: Option<PageRecord>, request: &DispatchRequest) -> Option<PageRecord> {
        page.filter(|page| page.is_online() || request.is_elevated())
    }

    async fn default_action(
        &self,
        request: &DispatchRequest,
        uri: &str,
    ) -> Result<DispatchResponse, DispatchError> {
        let site = self.site().await?;
        let uri = normalize(uri);
        let not_found = || {
            DispatchError::not_found(format!(
                "the URL `{}/{uri}` can not be found",
                request.host()
            ))
        };

        let (stem, extension) = split_extension(uri);
        match extension {
            Some(extension) if extension != self.expected_extension(&site) => {
                return Err(not_found());
            }
            None if self.settings.force_url_extension
                && uri != ROOT_URI
                && !uri.ends_with('/') =>
            {
                return Err(not_found());
            }
            _ => {}
        }

        let page = Self::visible(self.find_page(&site, stem).await?, request)
            .ok_or_else(not_found)?;

        if let Some(target) = page.active_redirect() {
            info!(page = %page.id, target, "Redirecting page request");
            return DispatchResponse::permanent_redirect(target);
        }

        info!(uri = stem, page = %page.id, "Handling URL request");
        let context = RenderContext::default()
            .with_request_uri(request.canonical_uri())
            .with_elevated(request.is_elevated());
        let body = self.render.render_page(&page, &context).await.map_err(|err| {
            DispatchError::internal(format!(
                "an error occurred while rendering URL `{}/{stem}`",
                request.host()
            ))
            .with_source(err)
        })?;
        Ok(DispatchResponse::html(body))
    }

    async fn rss_action(
        &self,
        request: &DispatchRequest,
        uri: &str,
    ) -> Result<DispatchResponse, DispatchError> {
        let uri = normalize(uri);
        let stem = uri.rsplit_once('.').map_or(uri, |(stem, _)| stem);

        match self.render_feed(request, stem).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(uri = stem, error = %err, "Feed rendering failed; serving page instead");
                self.default_action(request, &format!("rss/{stem}")).await
            }
        }
    }

    async fn render_feed(
        &self,
        request: &DispatchRequest,
        stem: &str,
    ) -> Result<DispatchResponse, DispatchError> {
        let site = self.site().await?;
        let page = Self::visible(self.find_page(&site, stem).await?, request)
            .ok_or_else(|| DispatchError::not_found(format!("no feed for `{stem}`")))?;

        info!(uri = stem, page = %page.id, "Handling feed request");
        let context = RenderContext::new(RSS_MODE)
            .with_request_uri(request.canonical_uri())
            .with_elevated(request.is_elevated());
        let body = self
            .render
            .render_page(&page, &context)
            .await
            .map_err(|err| DispatchError::internal("feed rendering failed").with_source(err))?;

        Ok(DispatchResponse::new(axum::http::StatusCode::OK, body)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))
            .with_header(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=15, s-maxage=15"),
            ))
    }
}

#[async_trait]
impl Controller for FrontController {
    fn name(&self) -> &'static str {
        super::DEFAULT_CONTROLLER
    }

    async fn invoke(
        &self,
        action: &str,
        request: &DispatchRequest,
        params: &BTreeMap<String, String>,
    ) -> Result<DispatchResponse, DispatchError> {
        let uri = params.get("uri").map(String::as_str).unwrap_or_default();
        match action {
            "default" => self.default_action(request, uri).await,
            "rss" => self.rss_action(request, uri).await,
            other => Err(DispatchError::bad_request(format!(
                "front controller has no action `{other}`"
            ))),
        }
    }
}

/// Strips the leading slash; the empty URI is the root page.
fn normalize(uri: &str) -> &str {
    let uri = uri.trim_start_matches('/');
    if uri.is_empty() { ROOT_URI } else { uri }
}

/// Splits `news/item.html` into (`news/item`, `Some("html")`).
fn split_extension(uri: &str) -> (&str, Option<&str>) {
    let last_segment = uri.rsplit('/').next().unwrap_or(uri);
    match last_segment.rsplit_once('.') {
        Some((name, extension))
            if !name.is_empty()
                && !extension.is_empty()
                && extension.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            let stem_len = uri.len() - extension.len() - 1;
            (&uri[..stem_len], Some(extension))
        }
        _ => (uri, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extension_only_looks_at_the_last_segment() {
        assert_eq!(split_extension("about.html"), ("about", Some("html")));
        assert_eq!(split_extension("news/item.xml"), ("news/item", Some("xml")));
        assert_eq!(split_extension("v1.2/notes"), ("v1.2/notes", None));
        assert_eq!(split_extension("blog/"), ("blog/", None));
        assert_eq!(split_extension(".hidden"), (".hidden", None));
    }

    #[test]
    fn normalize_maps_empty_to_root() {
        assert_eq!(normalize(""), ROOT_URI);
        assert_eq!(normalize("/"), ROOT_URI);
        assert_eq!(normalize("/about.html"), "about.html");
    }
}

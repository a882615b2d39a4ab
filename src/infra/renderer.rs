//! Built-in renderer producing a plain outline of the entity tree.
//!
//! The default mode emits HTML through askama templates; the `rss` mode emits
//! an RSS 2.0 channel with one item per content node.

use askama::Template;
use async_trait::async_trait;
use bytes::Bytes;

use crate::application::render::{Fragment, RenderError, RenderInput, Renderer};
use crate::domain::entities::{ContentRecord, PageRecord, RenderTarget};

const IDENTITY: &str = "outline";
const RSS_MODE: &str = "rss";

#[derive(Template)]
#[template(
    ext = "html",
    source = "<!DOCTYPE html>
<html>
<head><title>{{ title }}</title></head>
<body class=\"layout-{{ layout }}\">
{% for child in children %}{{ child|safe }}
{% endfor %}</body>
</html>
"
)]
struct PageTemplate<'a> {
    title: &'a str,
    layout: &'a str,
    children: Vec<String>,
}

#[derive(Template)]
#[template(
    ext = "html",
    source = "<div class=\"content content-{{ class_name }}\" data-id=\"{{ id }}\">{{ body }}{% for child in children %}{{ child|safe }}{% endfor %}</div>"
)]
struct ContentTemplate<'a> {
    class_name: &'a str,
    id: String,
    body: &'a str,
    children: Vec<String>,
}

/// Renders pages and content for the `default` and `rss` modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineRenderer;

impl OutlineRenderer {
    pub fn new() -> Self {
        Self
    }

    fn html_page(page: &PageRecord, children: &[Fragment]) -> Result<String, RenderError> {
        PageTemplate {
            title: &page.title,
            layout: &page.layout,
            children: fragments(children),
        }
        .render()
        .map_err(|err| RenderError::renderer(IDENTITY, err.to_string()))
    }

    fn html_content(content: &ContentRecord, children: &[Fragment]) -> Result<String, RenderError> {
        ContentTemplate {
            class_name: &content.class_name,
            id: content.id.to_string(),
            body: &content.body,
            children: fragments(children),
        }
        .render()
        .map_err(|err| RenderError::renderer(IDENTITY, err.to_string()))
    }

    fn rss_page(page: &PageRecord, children: &[Fragment]) -> String {
        let items: String = fragments(children).concat();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n  <channel>\n    <title>{}</title>\n    <link>{}</link>\n{}  </channel>\n</rss>\n",
            xml_escape(&page.title),
            xml_escape(&page.uri),
            items
        )
    }

    fn rss_content(content: &ContentRecord, children: &[Fragment]) -> String {
        let nested: String = fragments(children).concat();
        if content.body.is_empty() {
            return nested;
        }
        format!(
            "    <item>\n      <title>{}</title>\n      <guid>{}</guid>\n      <description>{}</description>\n    </item>\n{}",
            xml_escape(&content.label),
            content.id,
            xml_escape(&content.body),
            nested
        )
    }
}

#[async_trait]
impl Renderer for OutlineRenderer {
    fn identity(&self) -> &str {
        IDENTITY
    }

    async fn render(&self, input: RenderInput<'_>) -> Result<Bytes, RenderError> {
        let rss = input.context.mode() == RSS_MODE;
        let output = match input.target {
            RenderTarget::Page(page) if rss => Self::rss_page(page, input.children),
            RenderTarget::Content(content) if rss => Self::rss_content(content, input.children),
            RenderTarget::Page(page) => Self::html_page(page, input.children)?,
            RenderTarget::Content(content) => Self::html_content(content, input.children)?,
        };
        Ok(Bytes::from(output))
    }
}

fn fragments(children: &[Fragment]) -> Vec<String> {
    children
        .iter()
        .map(|fragment| String::from_utf8_lossy(&fragment.body).into_owned())
        .collect()
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

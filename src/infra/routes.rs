//! Pattern-based route table.
//!
//! Patterns are `/`-separated segments: literals, `{name}` (one non-empty
//! segment) and a trailing `{*name}` capturing the rest of the path, possibly
//! empty.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::application::repos::{RouteMatch, RouteTable};
use crate::config::{DispatchSettings, RouteSettings};

use super::error::InfraError;

const DEFAULT_ACTION: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Tail(String),
}

#[derive(Debug, Clone)]
struct Route {
    pattern: String,
    segments: Vec<Segment>,
    controller: Option<String>,
    action: String,
}

impl Route {
    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut rest = path.strip_prefix('/').unwrap_or(path);
        let mut params = BTreeMap::new();

        for segment in &self.segments {
            match segment {
                Segment::Tail(name) => {
                    params.insert(name.clone(), rest.to_string());
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    let (head, tail) = split_segment(rest);
                    if head != literal {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Param(name) => {
                    let (head, tail) = split_segment(rest);
                    if head.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), head.to_string());
                    rest = tail;
                }
            }
        }

        rest.is_empty().then_some(params)
    }
}

fn split_segment(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((head, tail)) => (head, tail),
        None => (path, ""),
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, InfraError> {
    let trimmed = pattern
        .strip_prefix('/')
        .ok_or_else(|| {
            InfraError::configuration(format!("route `{pattern}` must start with `/`"))
        })?;
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                if index != last {
                    return Err(InfraError::configuration(format!(
                        "route `{pattern}`: `{{*{name}}}` must be the last segment"
                    )));
                }
                Ok(Segment::Tail(name.to_string()))
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(InfraError::configuration(format!(
                        "route `{pattern}` has an unnamed parameter"
                    )));
                }
                Ok(Segment::Param(name.to_string()))
            } else if part.is_empty() {
                Err(InfraError::configuration(format!(
                    "route `{pattern}` has an empty segment"
                )))
            } else {
                Ok(Segment::Literal((*part).to_string()))
            }
        })
        .collect()
}

/// Ordered list of routes; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct PatternRoutes {
    routes: Vec<Route>,
}

impl PatternRoutes {
    /// Builds the table from configuration.
    ///
    /// Routes without an action are skipped with a warning.
    pub fn from_settings(routes: &[RouteSettings]) -> Result<Self, InfraError> {
        let mut table = Self::default();
        for route in routes {
            let Some(action) = route.action.as_deref().filter(|action| !action.is_empty()) else {
                warn!(
                    pattern = route.pattern.as_str(),
                    "Route has no action and will be skipped"
                );
                continue;
            };
            table.push(&route.pattern, route.controller.clone(), action)?;
        }
        Ok(table)
    }

    /// Single route sending everything to the default controller action.
    pub fn catch_all(dispatch: &DispatchSettings) -> Result<Self, InfraError> {
        let mut table = Self::default();
        table.push(&dispatch.catch_all, None, DEFAULT_ACTION)?;
        Ok(table)
    }

    pub fn push(
        &mut self,
        pattern: &str,
        controller: Option<String>,
        action: &str,
    ) -> Result<(), InfraError> {
        let segments = parse_pattern(pattern)?;
        debug!(pattern, action, "Registered route");
        self.routes.push(Route {
            pattern: pattern.to_string(),
            segments,
            controller,
            action: action.to_string(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteTable for PatternRoutes {
    fn match_path(&self, path: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            let params = route.matches(path)?;
            debug!(pattern = route.pattern.as_str(), path, "Route matched");
            Some(RouteMatch {
                controller: route.controller.clone(),
                action: route.action.clone(),
                params,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str, controller: Option<&str>, action: Option<&str>) -> RouteSettings {
        RouteSettings {
            pattern: pattern.to_string(),
            controller: controller.map(str::to_string),
            action: action.map(str::to_string),
        }
    }

    #[test]
    fn params_and_tails_are_captured() {
        let table = PatternRoutes::from_settings(&[
            route("/feed/{*uri}", None, Some("rss")),
            route("/api/{kind}/{id}", Some("api"), Some("show")),
        ])
        .unwrap();

        let feed = table.match_path("/feed/news/item.xml").expect("feed route");
        assert_eq!(feed.controller, None);
        assert_eq!(feed.action, "rss");
        assert_eq!(feed.params["uri"], "news/item.xml");

        let api = table.match_path("/api/page/42").expect("api route");
        assert_eq!(api.controller.as_deref(), Some("api"));
        assert_eq!(api.params["kind"], "page");
        assert_eq!(api.params["id"], "42");

        assert!(table.match_path("/api/page").is_none());
        assert!(table.match_path("/api/page/42/extra").is_none());
    }

    #[test]
    fn routes_without_action_are_skipped() {
        let table = PatternRoutes::from_settings(&[
            route("/broken", None, None),
            route("/ok", None, Some("default")),
        ])
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.match_path("/broken").is_none());
    }

    #[test]
    fn catch_all_matches_root_with_empty_tail() {
        let table = PatternRoutes::catch_all(&DispatchSettings::default()).unwrap();
        let matched = table.match_path("/").expect("root matches");
        assert_eq!(matched.action, "default");
        assert_eq!(matched.params["uri"], "");

        let nested = table.match_path("/docs/intro.html").unwrap();
        assert_eq!(nested.params["uri"], "docs/intro.html");
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(parse_pattern("no-slash").is_err());
        assert!(parse_pattern("/{*tail}/more").is_err());
        assert!(parse_pattern("/a//b").is_err());
        assert!(parse_pattern("/{}").is_err());
    }
}

//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_CAPACITY: usize = 2048;
const DEFAULT_PAGE_CAPACITY: usize = 512;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60;
const DEFAULT_URL_EXTENSION: &str = "html";
const DEFAULT_CATCH_ALL: &str = "/{*uri}";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub site: SiteSettings,
    pub dispatch: DispatchSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enable_content_cache: bool,
    pub enable_page_cache: bool,
    pub content_capacity: usize,
    pub page_capacity: usize,
    pub skip_authenticated: bool,
    pub skip_offline: bool,
    pub respect_cache_status: bool,
    pub excluded_page_prefixes: Vec<String>,
    pub cache_query_strings: bool,
    pub purge_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub fixture: Option<PathBuf>,
    pub url_extension: String,
    pub force_url_extension: bool,
    /// Token that marks a public request as elevated.
    pub preview_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub catch_all: String,
    pub routes: Vec<RouteSettings>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            catch_all: DEFAULT_CATCH_ALL.to_string(),
            routes: Vec::new(),
        }
    }
}

/// One `[[dispatch.routes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteSettings {
    pub pattern: String,
    pub controller: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    site: RawSiteSettings,
    dispatch: RawDispatchSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.site_fixture.as_ref() {
            self.site.fixture = Some(path.clone());
        }
        if let Some(enabled) = overrides.cache_enable_content_cache {
            self.cache.enable_content_cache = Some(enabled);
        }
        if let Some(enabled) = overrides.cache_enable_page_cache {
            self.cache.enable_page_cache = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_purge_interval_seconds {
            self.cache.purge_interval_seconds = Some(seconds);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.site_fixture.as_ref() {
            self.site.fixture = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            site,
            dispatch,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            site: build_site_settings(site)?,
            dispatch: build_dispatch_settings(dispatch)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the public address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let content_capacity = cache.content_capacity.unwrap_or(DEFAULT_CONTENT_CAPACITY);
    if content_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.content_capacity",
            "must be greater than zero",
        ));
    }

    let page_capacity = cache.page_capacity.unwrap_or(DEFAULT_PAGE_CAPACITY);
    if page_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.page_capacity",
            "must be greater than zero",
        ));
    }

    let purge_secs = cache
        .purge_interval_seconds
        .unwrap_or(DEFAULT_PURGE_INTERVAL_SECS);
    if purge_secs == 0 {
        return Err(LoadError::invalid(
            "cache.purge_interval_seconds",
            "must be greater than zero",
        ));
    }

    let excluded_page_prefixes = cache
        .excluded_page_prefixes
        .unwrap_or_default()
        .into_iter()
        .map(|prefix| prefix.trim().to_string())
        .filter(|prefix| !prefix.is_empty())
        .collect::<Vec<_>>();
    if let Some(prefix) = excluded_page_prefixes
        .iter()
        .find(|prefix| !prefix.starts_with('/'))
    {
        return Err(LoadError::invalid(
            "cache.excluded_page_prefixes",
            format!("prefix `{prefix}` must start with `/`"),
        ));
    }

    Ok(CacheSettings {
        enable_content_cache: cache.enable_content_cache.unwrap_or(true),
        enable_page_cache: cache.enable_page_cache.unwrap_or(true),
        content_capacity,
        page_capacity,
        skip_authenticated: cache.skip_authenticated.unwrap_or(true),
        skip_offline: cache.skip_offline.unwrap_or(true),
        respect_cache_status: cache.respect_cache_status.unwrap_or(true),
        excluded_page_prefixes,
        cache_query_strings: cache.cache_query_strings.unwrap_or(false),
        purge_interval: Duration::from_secs(purge_secs),
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let fixture = site
        .fixture
        .filter(|path| !path.as_os_str().is_empty());

    let url_extension = site
        .url_extension
        .map(|extension| extension.trim().trim_start_matches('.').to_string())
        .unwrap_or_else(|| DEFAULT_URL_EXTENSION.to_string());
    if url_extension.is_empty() || !url_extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LoadError::invalid(
            "site.url_extension",
            "must be a non-empty alphanumeric extension",
        ));
    }

    let preview_token = site.preview_token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(SiteSettings {
        fixture,
        url_extension,
        force_url_extension: site.force_url_extension.unwrap_or(true),
        preview_token,
    })
}

fn build_dispatch_settings(dispatch: RawDispatchSettings) -> Result<DispatchSettings, LoadError> {
    let catch_all = dispatch
        .catch_all
        .unwrap_or_else(|| DEFAULT_CATCH_ALL.to_string());
    if !catch_all.starts_with('/') {
        return Err(LoadError::invalid(
            "dispatch.catch_all",
            "pattern must start with `/`",
        ));
    }

    let routes = dispatch.routes.unwrap_or_default();
    if let Some(route) = routes.iter().find(|route| !route.pattern.starts_with('/')) {
        return Err(LoadError::invalid(
            "dispatch.routes",
            format!("pattern `{}` must start with `/`", route.pattern),
        ));
    }

    Ok(DispatchSettings { catch_all, routes })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_content_cache: Option<bool>,
    enable_page_cache: Option<bool>,
    content_capacity: Option<usize>,
    page_capacity: Option<usize>,
    skip_authenticated: Option<bool>,
    skip_offline: Option<bool>,
    respect_cache_status: Option<bool>,
    excluded_page_prefixes: Option<Vec<String>>,
    cache_query_strings: Option<bool>,
    purge_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    fixture: Option<PathBuf>,
    url_extension: Option<String>,
    force_url_extension: Option<bool>,
    preview_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDispatchSettings {
    catch_all: Option<String>,
    routes: Option<Vec<RouteSettings>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

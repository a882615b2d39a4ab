use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Quire content rendering server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and administrative HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Dispatch a single request through the pipeline and print the body.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Request target, e.g. `/about.html` or `/?lang=fr`.
    #[arg(value_name = "URI")]
    pub uri: String,

    /// Render as a privileged requester (offline pages become visible).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub elevated: bool,

    /// Host the request is addressed to.
    #[arg(long, default_value = "localhost", value_name = "HOST")]
    pub host: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the site fixture path.
    #[arg(long = "site-fixture", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub site_fixture: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the site fixture path.
    #[arg(long = "site-fixture", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub site_fixture: Option<PathBuf>,

    /// Enable the content fragment cache.
    #[arg(
        long = "cache-enable-content-cache",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enable_content_cache: Option<bool>,

    /// Enable the page cache.
    #[arg(
        long = "cache-enable-page-cache",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enable_page_cache: Option<bool>,

    /// Override the expired-entry purge interval.
    #[arg(long = "cache-purge-interval-seconds", value_name = "SECONDS")]
    pub cache_purge_interval_seconds: Option<u64>,
}

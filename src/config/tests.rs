use clap::Parser;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert!(settings.cache.enable_content_cache);
    assert!(settings.cache.enable_page_cache);
    assert_eq!(settings.cache.content_capacity, 2048);
    assert_eq!(settings.cache.page_capacity, 512);
    assert!(!settings.cache.cache_query_strings);
    assert_eq!(settings.cache.purge_interval, Duration::from_secs(60));
    assert_eq!(settings.site.url_extension, "html");
    assert!(settings.site.force_url_extension);
    assert!(settings.site.fixture.is_none());
    assert_eq!(settings.dispatch.catch_all, "/{*uri}");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn cache_toggles_can_be_overridden_via_cli() {
    let mut raw = RawSettings::default();
    raw.cache.enable_page_cache = Some(true);
    let overrides = ServeOverrides {
        cache_enable_page_cache: Some(false),
        site_fixture: Some(PathBuf::from("demos/site.toml")),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enable_page_cache);
    assert!(settings.cache.enable_content_cache);
    assert_eq!(
        settings.site.fixture.as_deref(),
        Some(std::path::Path::new("demos/site.toml"))
    );
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.page_capacity = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.page_capacity",
            ..
        }
    ));
}

#[test]
fn url_extension_drops_leading_dot() {
    let mut raw = RawSettings::default();
    raw.site.url_extension = Some(".htm".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.site.url_extension, "htm");

    let mut raw = RawSettings::default();
    raw.site.url_extension = Some("h/t".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn excluded_prefixes_must_be_absolute() {
    let mut raw = RawSettings::default();
    raw.cache.excluded_page_prefixes = Some(vec!["/admin".to_string(), " ".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.excluded_page_prefixes, vec!["/admin"]);

    let mut raw = RawSettings::default();
    raw.cache.excluded_page_prefixes = Some(vec!["admin".to_string()]);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn shared_listener_address_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.admin_port = Some(DEFAULT_PUBLIC_PORT);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_preview_token_is_ignored() {
    let mut raw = RawSettings::default();
    raw.site.preview_token = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.site.preview_token.is_none());
}

#[test]
fn routes_deserialize_from_toml() {
    let raw: RawSettings = toml::from_str(
        r#"
        [dispatch]
        catch_all = "/{*uri}"

        [[dispatch.routes]]
        pattern = "/feed/{*uri}"
        action = "rss"

        [[dispatch.routes]]
        pattern = "/broken"
        "#,
    )
    .expect("toml parses");
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.dispatch.routes.len(), 2);
    assert_eq!(settings.dispatch.routes[0].action.as_deref(), Some("rss"));
    assert_eq!(settings.dispatch.routes[0].controller, None);
    assert_eq!(settings.dispatch.routes[1].action, None);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["quire"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "quire",
        "render",
        "--site-fixture",
        "demos/site.toml",
        "--elevated",
        "/about.html",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.uri, "/about.html");
            assert!(render.elevated);
            assert_eq!(render.host, "localhost");
            assert_eq!(
                render.overrides.site_fixture.as_deref(),
                Some(std::path::Path::new("demos/site.toml"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_cache_toggles() {
    let args = CliArgs::parse_from([
        "quire",
        "serve",
        "--cache-enable-content-cache",
        "false",
        "--server-public-port",
        "8080",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.cache_enable_content_cache, Some(false));
            assert_eq!(serve.overrides.public_port, Some(8080));
        }
        _ => panic!("wrong command parsed"),
    }
}

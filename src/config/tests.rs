use std::io::Write;

use super::*;

fn memcached_raw() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.store.address = Some("cache.internal".to_string());
    raw
}

#[test]
fn defaults_require_store_address() {
    let err = Settings::from_raw(RawSettings::default()).expect_err("address is mandatory");
    assert!(matches!(
        err,
        LoadError::Missing {
            key: "store.address"
        }
    ));
}

#[test]
fn blank_store_address_is_missing() {
    let mut raw = RawSettings::default();
    raw.store.address = Some("   ".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Missing { .. })
    ));
}

#[test]
fn defaults_with_address() {
    let settings = Settings::from_raw(memcached_raw()).expect("valid settings");
    assert_eq!(
        settings.store.backend,
        StoreBackend::Memcached {
            address: "cache.internal:11211".to_string()
        }
    );
    assert_eq!(settings.store.io_timeout, Duration::from_millis(500));
    assert_eq!(settings.cache.ttl, Ttl::TWO_WEEKS);
    assert_eq!(settings.http.timeout, Duration::from_secs(1));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(!settings.logging.verbose);
}

#[test]
fn explicit_port_is_kept() {
    let mut raw = RawSettings::default();
    raw.store.address = Some("10.1.2.3:7000".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.store.backend,
        StoreBackend::Memcached {
            address: "10.1.2.3:7000".to_string()
        }
    );
}

#[test]
fn memory_backend_needs_no_address() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("Memory".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store.backend, StoreBackend::Memory);
}

#[test]
fn unknown_backend_is_invalid() {
    let mut raw = memcached_raw();
    raw.store.backend = Some("redis".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "store.backend",
            ..
        })
    ));
}

#[test]
fn zero_timeouts_are_rejected() {
    let mut raw = memcached_raw();
    raw.http.timeout_ms = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "http.timeout_ms",
            ..
        })
    ));

    let mut raw = memcached_raw();
    raw.store.io_timeout_ms = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "store.io_timeout_ms",
            ..
        })
    ));
}

#[test]
fn zero_ttl_means_no_expiry() {
    let mut raw = memcached_raw();
    raw.cache.ttl_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.ttl, Ttl::NEVER);
    assert!(!settings.cache.ttl.expires());
}

#[test]
fn oversized_ttl_is_rejected() {
    let mut raw = memcached_raw();
    raw.cache.ttl_seconds = Some(u64::from(u32::MAX) + 1);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        })
    ));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = memcached_raw();
    raw.http.timeout_ms = Some(5_000);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        store_address: Some("override.internal:9999".to_string()),
        http_timeout_ms: Some(250),
        cache_ttl_seconds: Some(60),
        log_level: Some("debug".to_string()),
        verbose: true,
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings.store.backend,
        StoreBackend::Memcached {
            address: "override.internal:9999".to_string()
        }
    );
    assert_eq!(settings.http.timeout, Duration::from_millis(250));
    assert_eq!(settings.cache.ttl, Ttl::from_secs(60));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(settings.logging.verbose);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = memcached_raw();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn verbose_env_enables_diagnostics_unless_configured() {
    let mut raw = memcached_raw();
    raw.apply_verbose_env(true);
    assert!(Settings::from_raw(raw).expect("valid").logging.verbose);

    let mut raw = memcached_raw();
    raw.logging.verbose = Some(false);
    raw.apply_verbose_env(true);
    assert!(!Settings::from_raw(raw).expect("valid").logging.verbose);

    let mut raw = memcached_raw();
    raw.apply_verbose_env(false);
    assert!(!Settings::from_raw(raw).expect("valid").logging.verbose);
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = memcached_raw();
    raw.logging.level = Some("chatty".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn config_file_is_layered_under_cli() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    file.write_all(
        br#"
[store]
address = "file.internal"

[cache]
ttl_seconds = 120

[http]
timeout_ms = 3000
"#,
    )
    .expect("write config");
    file.flush().expect("flush config");

    let path = file.path().to_string_lossy().into_owned();
    let cli = CliArgs::parse_from([
        "page-proxy",
        "--config-file",
        path.as_str(),
        "--http-timeout-ms",
        "750",
        "has",
        "42",
    ]);
    let settings = load(&cli).expect("valid settings");

    assert_eq!(
        settings.store.backend,
        StoreBackend::Memcached {
            address: "file.internal:11211".to_string()
        }
    );
    assert_eq!(settings.cache.ttl, Ttl::from_secs(120));
    assert_eq!(settings.http.timeout, Duration::from_millis(750));
}

#[test]
fn parse_resolve_arguments() {
    let args = CliArgs::parse_from([
        "page-proxy",
        "resolve",
        "--url",
        "http://localhost:39012/page?pageId=7",
        "--timeout-ms",
        "200",
        "page",
        "7",
    ]);

    match args.command {
        Command::Resolve(resolve) => {
            assert_eq!(resolve.url, "http://localhost:39012/page?pageId=7");
            assert_eq!(resolve.timeout_ms, Some(200));
            assert_eq!(resolve.id.ids, vec!["page".to_string(), "7".to_string()]);
            let id = resolve.id.identifier().expect("non-empty identifier");
            assert_eq!(id.cache_key(), "ProxyPageCache_[page,7]");
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_global_overrides_after_subcommand() {
    let args = CliArgs::parse_from([
        "page-proxy",
        "forget",
        "-17",
        "--store-address",
        "localhost",
        "--verbose",
    ]);

    assert!(matches!(args.command, Command::Forget(_)));
    assert_eq!(args.overrides.store_address.as_deref(), Some("localhost"));
    assert!(args.overrides.verbose);
}

#[test]
fn parse_cache_arguments() {
    let args = CliArgs::parse_from(["page-proxy", "cache", "--file", "/tmp/page.html", "home"]);

    match args.command {
        Command::Cache(cache) => {
            assert_eq!(
                cache.file.as_deref(),
                Some(std::path::Path::new("/tmp/page.html"))
            );
            assert_eq!(cache.id.ids, vec!["home".to_string()]);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn identifier_is_required() {
    assert!(CliArgs::try_parse_from(["page-proxy", "read"]).is_err());
}

//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{Ttl, normalize_address};

mod cli;

pub use cli::{CacheArgs, CliArgs, Command, IdArgs, Overrides, ResolveArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "page-proxy";
const ENV_PREFIX: &str = "PAGE_PROXY";
/// Presence of this variable turns on verbose diagnostics.
const VERBOSE_ENV: &str = "VERBOSE";
const DEFAULT_STORE_IO_TIMEOUT_MS: u64 = 500;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 1_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub http: HttpSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared memcached server; the address always carries a port.
    Memcached { address: String },
    /// Process-local map, lost on exit.
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub io_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Ttl,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("missing required configuration `{key}`")]
    Missing { key: &'static str },
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_verbose_env(std::env::var_os(VERBOSE_ENV).is_some());
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    store: RawStoreSettings,
    cache: RawCacheSettings,
    http: RawHttpSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(address) = overrides.store_address.as_ref() {
            self.store.address = Some(address.clone());
        }
        if let Some(timeout) = overrides.store_io_timeout_ms {
            self.store.io_timeout_ms = Some(timeout);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(timeout) = overrides.http_timeout_ms {
            self.http.timeout_ms = Some(timeout);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if overrides.verbose {
            self.logging.verbose = Some(true);
        }
    }

    fn apply_verbose_env(&mut self, present: bool) {
        if present && self.logging.verbose.is_none() {
            self.logging.verbose = Some(true);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            store,
            cache,
            http,
            logging,
        } = raw;

        let store = build_store_settings(store)?;
        let cache = build_cache_settings(cache)?;
        let http = build_http_settings(http)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            store,
            cache,
            http,
            logging,
        })
    }
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend.as_deref().map(str::trim) {
        None | Some("") => "memcached".to_string(),
        Some(value) => value.to_ascii_lowercase(),
    };

    let backend = match backend.as_str() {
        "memcached" => {
            let address = store
                .address
                .and_then(|value| {
                    let trimmed = value.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
                .ok_or(LoadError::Missing {
                    key: "store.address",
                })?;
            StoreBackend::Memcached {
                address: normalize_address(&address),
            }
        }
        "memory" => StoreBackend::Memory,
        other => {
            return Err(LoadError::invalid(
                "store.backend",
                format!("unknown backend `{other}` (expected memcached or memory)"),
            ));
        }
    };

    let io_timeout = positive_millis(
        store.io_timeout_ms.unwrap_or(DEFAULT_STORE_IO_TIMEOUT_MS),
        "store.io_timeout_ms",
    )?;

    Ok(StoreSettings {
        backend,
        io_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl = match cache.ttl_seconds {
        Some(seconds) => u32::try_from(seconds).map(Ttl::from_secs).map_err(|_| {
            LoadError::invalid("cache.ttl_seconds", "value exceeds supported range for u32")
        })?,
        None => Ttl::default(),
    };
    Ok(CacheSettings { ttl })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout = positive_millis(
        http.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        "http.timeout_ms",
    )?;
    Ok(HttpSettings { timeout })
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

    Ok(LoggingSettings {
        level,
        format,
        verbose: logging.verbose.unwrap_or(false),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    address: Option<String>,
    io_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    verbose: Option<bool>,
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Parse CLI arguments and resolve settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[cfg(test)]
mod tests;

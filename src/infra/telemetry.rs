use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const CACHE_HIT_TOTAL: &str = "page_proxy_cache_hit_total";
pub const CACHE_MISS_TOTAL: &str = "page_proxy_cache_miss_total";
pub const ORIGIN_FETCH_TOTAL: &str = "page_proxy_origin_fetch_total";
pub const STORE_WRITE_FAILED_TOTAL: &str = "page_proxy_store_write_failed_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // Diagnostics go to stderr so `resolve` output on stdout stays clean.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of resolves served from the page cache."
        );
        describe_counter!(
            CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of resolves that fell through to the origin."
        );
        describe_counter!(
            ORIGIN_FETCH_TOTAL,
            Unit::Count,
            "Total number of origin requests issued."
        );
        describe_counter!(
            STORE_WRITE_FAILED_TOTAL,
            Unit::Count,
            "Total number of cache population writes that failed after a successful fetch."
        );
    });
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::dispatch::METRIC_DISPATCH_MS;
use crate::cache::metric_names::{
    METRIC_CACHE_BACKEND_ERROR_TOTAL, METRIC_CACHE_EVICT_TOTAL, METRIC_CACHE_FLUSH_MS,
    METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_STORE_REJECTED_TOTAL,
    METRIC_CACHE_STORE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so `quire render` can stream the body on stdout.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

/// Registers units and help text for every metric the crate emits.
///
/// Safe to call repeatedly; only the first call reaches the recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of render cache hits, by layer."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of render cache misses, by layer."
        );
        describe_counter!(
            METRIC_CACHE_STORE_TOTAL,
            Unit::Count,
            "Total number of rendered artifacts written to the cache."
        );
        describe_counter!(
            METRIC_CACHE_STORE_REJECTED_TOTAL,
            Unit::Count,
            "Total number of cache writes dropped because an invalidation overtook the render."
        );
        describe_counter!(
            METRIC_CACHE_BACKEND_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed cache store operations."
        );
        describe_counter!(
            METRIC_CACHE_EVICT_TOTAL,
            Unit::Count,
            "Total number of cache entries evicted, by reason."
        );
        describe_histogram!(
            METRIC_CACHE_FLUSH_MS,
            Unit::Milliseconds,
            "Invalidation batch latency in milliseconds."
        );
        describe_histogram!(
            METRIC_DISPATCH_MS,
            Unit::Milliseconds,
            "Request dispatch latency in milliseconds, by outcome."
        );
    });
}

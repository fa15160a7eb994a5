use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    tracing::debug!(
        target = "listing_cache::telemetry",
        level = %logging.level,
        json = matches!(logging.format, LogFormat::Json),
        "telemetry initialized"
    );
    Ok(())
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "listing_cache_hit_total",
            Unit::Count,
            "Total number of listing reads served from the cache store."
        );
        describe_counter!(
            "listing_cache_miss_total",
            Unit::Count,
            "Total number of listing reads that fell through to the query source."
        );
        describe_counter!(
            "listing_cache_evict_total",
            Unit::Count,
            "Total number of in-memory entries evicted due to capacity."
        );
        describe_counter!(
            "listing_cache_store_error_total",
            Unit::Count,
            "Total number of cache store calls that failed or timed out."
        );
        describe_counter!(
            "listing_cache_invalidate_total",
            Unit::Count,
            "Total number of tag invalidations applied."
        );
        describe_histogram!(
            "listing_cache_warm_ms",
            Unit::Milliseconds,
            "Time to warm one listing, in milliseconds."
        );
    });
}

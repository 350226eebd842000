use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingConfig) -> Result<(), TelemetryError> {
    describe_metrics();

    let default_directive = logging
        .level
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError(err.to_string()))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "chirp_query_cache_hit_total",
            Unit::Count,
            "Queries answered from the session cache without a fetch."
        );
        describe_counter!(
            "chirp_query_cache_miss_total",
            Unit::Count,
            "Queries that required a backend fetch."
        );
        describe_counter!(
            "chirp_query_dedup_total",
            Unit::Count,
            "Callers that joined an already in-flight fetch."
        );
        describe_counter!(
            "chirp_query_invalidate_total",
            Unit::Count,
            "Invalidation passes over the query cache."
        );
        describe_counter!(
            "chirp_query_stale_discard_total",
            Unit::Count,
            "Fetch completions discarded because the entry moved to a newer generation."
        );
        describe_counter!(
            "chirp_page_serve_total",
            Unit::Count,
            "Resolved pages by delivery state (fresh, stale, not_found)."
        );
        describe_counter!(
            "chirp_page_build_total",
            Unit::Count,
            "Snapshot builds by path (blocking, background)."
        );
        describe_histogram!(
            "chirp_snapshot_build_ms",
            Unit::Milliseconds,
            "Wall time spent building one page snapshot."
        );
    });
}

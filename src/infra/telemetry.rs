use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe the crate's metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = if logging.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
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
            "chorus_cache_hit_total",
            Unit::Count,
            "Record lookups answered from the cache."
        );
        describe_counter!(
            "chorus_cache_miss_total",
            Unit::Count,
            "Record lookups that had to read the durable store."
        );
        describe_counter!(
            "chorus_cache_fallback_total",
            Unit::Count,
            "Cache operations that failed and were treated as misses."
        );
        describe_counter!(
            "chorus_index_rebuild_total",
            Unit::Count,
            "Ordered index rebuilds, labelled by outcome."
        );
        describe_counter!(
            "chorus_index_inconsistent_total",
            Unit::Count,
            "Index reads that found fewer members than the recorded cardinality."
        );
        describe_counter!(
            "chorus_index_store_fallback_total",
            Unit::Count,
            "Index windows answered by the durable store, labelled by reason."
        );
        describe_counter!(
            "chorus_task_dropped_total",
            Unit::Count,
            "Background tasks dropped because a worker queue was full."
        );
        describe_gauge!(
            "chorus_task_queue_len",
            Unit::Count,
            "Background tasks submitted and not yet finished."
        );
        describe_histogram!(
            "chorus_task_ms",
            Unit::Milliseconds,
            "Background task latency in milliseconds."
        );
        describe_counter!(
            "chorus_fanout_failure_total",
            Unit::Count,
            "Failed post-commit fan-out steps, labelled by step."
        );
        describe_histogram!(
            "chorus_rebuild_ms",
            Unit::Milliseconds,
            "Ordered index rebuild latency in milliseconds."
        );
    });
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_BYPASS_TOTAL, METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_LOCK_TIMEOUT_TOTAL,
    METRIC_LOCK_WAIT_MS, METRIC_MISS_TOTAL, METRIC_TAG_RECORD_FAILURE_TOTAL,
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
        })
}

/// Register descriptions for the response cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of response-cache hits, labelled by fast or locked path."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of responses computed after a double cache miss."
        );
        describe_counter!(
            METRIC_BYPASS_TOTAL,
            Unit::Count,
            "Total number of requests served uncached after the lock wait elapsed."
        );
        describe_counter!(
            METRIC_LOCK_TIMEOUT_TOTAL,
            Unit::Count,
            "Total number of per-key lock waits that elapsed."
        );
        describe_counter!(
            METRIC_TAG_RECORD_FAILURE_TOTAL,
            Unit::Count,
            "Total number of cached responses whose tag membership could not be recorded."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of entries evicted from the in-process store at its entry limit."
        );
        describe_histogram!(
            METRIC_LOCK_WAIT_MS,
            Unit::Milliseconds,
            "Time spent acquiring the per-key lock in milliseconds."
        );
    });
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tideline_relation_mutations_total",
            Unit::Count,
            "Total number of applied relationship mutations by kind and direction."
        );
        describe_counter!(
            "tideline_ranking_events_total",
            Unit::Count,
            "Total number of engagement events applied to the ranking engine."
        );
        describe_counter!(
            "tideline_history_evictions_total",
            Unit::Count,
            "Total number of browse-history entries evicted by the cached bound."
        );
        describe_gauge!(
            "tideline_write_behind_depth",
            Unit::Count,
            "Current number of coalesced entries in the write-behind buffer."
        );
        describe_histogram!(
            "tideline_write_behind_flush_seconds",
            Unit::Seconds,
            "Write-behind flush latency in seconds."
        );
        describe_counter!(
            "tideline_write_behind_flushed_total",
            Unit::Count,
            "Total number of durable rows written by write-behind flushes."
        );
        describe_counter!(
            "tideline_reconciliation_repairs_total",
            Unit::Count,
            "Total number of durable rows repaired by reconciliation."
        );
        describe_histogram!(
            "tideline_feed_merge_seconds",
            Unit::Seconds,
            "Personal-feed merge and page latency in seconds."
        );
        describe_gauge!(
            "tideline_queue_depth",
            Unit::Count,
            "Current depth per named queue."
        );
        describe_counter!(
            "tideline_notifications_total",
            Unit::Count,
            "Total number of outbound notifications by kind and outcome."
        );
    });
}

//! Metrics initialization for the Prometheus exporter.

use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    describe_counter!(
        "sinkhole_queries_total",
        Unit::Count,
        "Answered queries by outcome (blocked, allowed, errored)"
    );
    describe_counter!(
        "sinkhole_cache_total",
        Unit::Count,
        "Decision cache lookups by result (hit, miss)"
    );

    Ok(())
}

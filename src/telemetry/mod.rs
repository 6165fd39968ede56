//! Metrics recorder bridge and log-backed error tracker

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use crate::traits::{ErrorTracker, MetricsSink};

/// Serve the process-wide recorder's metrics on `addr` for Prometheus to scrape
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install prometheus recorder")?;

    info!("Serving metrics on http://{addr}/metrics");
    Ok(())
}

/// Forwards to whichever `metrics` recorder is installed; a no-op without one
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) {
        let labels: Vec<Label> = tags
            .iter()
            .map(|(key, value)| Label::new(key.to_string(), value.to_string()))
            .collect();
        metrics::counter!(name.to_string(), labels).increment(1);
    }

    fn record_histogram(&self, name: &str, value: f64) {
        metrics::histogram!(name.to_string()).record(value);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorTracker;

impl ErrorTracker for TracingErrorTracker {
    fn capture_error(&self, error: &(dyn std::error::Error + Send + Sync)) {
        error!(target: "error_tracker", error = %error, "captured error");
    }
}

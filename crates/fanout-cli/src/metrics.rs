//! Prometheus export of broker metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and start its HTTP listener.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn start_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    fanout_core::metrics::describe_metrics();
    info!("Metrics server listening on {}", addr);
    Ok(())
}

//! Prometheus export.
//!
//! The engine crates record through the `metrics` facade; this module
//! installs the recorder and serves it over HTTP.

use crate::settings::MetricsSettings;
use anyhow::{Context, Result};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names owned by the daemon.
pub mod names {
    pub const START_TIME_SECONDS: &str = "slobridge_start_time_seconds";
    pub const SOCKETS_CONFIGURED: &str = "slobridge_sockets_configured";
}

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Returns an error if the address is invalid or the listener cannot be
/// installed.
pub fn init(settings: &MetricsSettings, sockets: usize) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("Invalid metrics address {}:{}", settings.host, settings.port))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    slobridge_core::metrics::describe();
    metrics::describe_gauge!(names::START_TIME_SECONDS, "Unix time the daemon started");
    metrics::describe_gauge!(names::SOCKETS_CONFIGURED, "Sockets declared in the configuration");

    gauge!(names::START_TIME_SECONDS).set(slobridge_core::event::now_millis() as f64 / 1000.0);
    gauge!(names::SOCKETS_CONFIGURED).set(sockets as f64);

    info!(%addr, "Metrics server listening");
    Ok(())
}

//! Metrics collection and exposition.
//!
//! # Metrics
//! - `greenlight_connections_total` (counter): accepted connections
//! - `greenlight_active_connections` (gauge): connections currently served
//! - `greenlight_background_tasks` (gauge): registered background tasks
//! - `greenlight_shutdowns_total` (counter): shutdowns by outcome
//!
//! Updates are no-ops until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("greenlight_connections_total").increment(1);
}

// Gauges only move by deltas, paired by the guard that owns each unit.

pub fn connection_opened() {
    gauge!("greenlight_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("greenlight_active_connections").decrement(1.0);
}

pub fn background_task_registered() {
    gauge!("greenlight_background_tasks").increment(1.0);
}

pub fn background_task_released() {
    gauge!("greenlight_background_tasks").decrement(1.0);
}

pub fn record_shutdown(outcome: &'static str) {
    counter!("greenlight_shutdowns_total", "outcome" => outcome).increment(1);
}

//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Clients registered with the hub (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Clients removed from the hub for any reason (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Clients currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcasts fanned out by the hub (counter).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
/// Clients evicted because their mailbox was full (counter).
pub const WS_BROADCAST_EVICTIONS_TOTAL: &str = "ws_broadcast_evictions_total";

//! Prometheus metrics recorder and metric names.

pub use metrics_exporter_prometheus::PrometheusHandle;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` route. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared across crates.

/// Viewer sockets admitted to the hub (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Viewer sockets removed from the hub (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Viewer sockets currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused by the origin check (counter).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Events accepted onto the broadcast queue (counter).
pub const WS_BROADCAST_PUBLISHED_TOTAL: &str = "ws_broadcast_published_total";
/// Events dropped because the broadcast queue was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Per-connection deliveries from the fan-out loop (counter).
pub const WS_MESSAGES_DELIVERED_TOTAL: &str = "ws_messages_delivered_total";
/// Connections evicted for a full mailbox (counter).
pub const WS_SLOW_CONSUMER_EVICTIONS_TOTAL: &str = "ws_slow_consumer_evictions_total";
/// Device authentication attempts (counter, labels: outcome).
pub const DEVICE_AUTH_TOTAL: &str = "device_auth_total";
/// Waypoints stored (counter).
pub const WAYPOINTS_REGISTERED_TOTAL: &str = "waypoints_registered_total";

//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered users (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Messages durably stored by the hub (counter).
pub const HUB_MESSAGES_PERSISTED_TOTAL: &str = "hub_messages_persisted_total";
/// Chat events aborted by a store failure (counter).
pub const HUB_PERSISTENCE_ERRORS_TOTAL: &str = "hub_persistence_errors_total";
/// Deliveries dropped because the recipient queue was full or closed (counter).
pub const HUB_DELIVERY_DROPS_TOTAL: &str = "hub_delivery_drops_total";
/// Inbound frames that failed to decode (counter).
pub const HUB_DECODE_ERRORS_TOTAL: &str = "hub_decode_errors_total";
/// Panics caught while handling a single event (counter).
pub const HUB_EVENT_PANICS_TOTAL: &str = "hub_event_panics_total";

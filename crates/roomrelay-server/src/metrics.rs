//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Rooms with at least one member (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
/// Join attempts rejected before registration (counter).
pub const JOIN_REJECTIONS_TOTAL: &str = "join_rejections_total";
/// Chat messages relayed to a room (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Frames a recipient's outbound queue did not accept (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";

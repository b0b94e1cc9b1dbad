//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Handle to a recorder that is not installed globally.
///
/// Renders nothing the dispatcher records; used when a global recorder is
/// already present (tests, embedding applications).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Sessions opened (counter, labels: path).
pub const WS_CONNECTIONS_TOTAL: &str = "beatbox_ws_connections_total";
/// Sessions ended (counter, labels: path).
pub const WS_DISCONNECTIONS_TOTAL: &str = "beatbox_ws_disconnections_total";
/// Session lifetime (histogram, labels: path).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "beatbox_ws_connection_duration_seconds";
/// Outbound frames refused because the queue was full or closed (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "beatbox_ws_send_drops_total";
/// Sessions closed by the idle timeout (counter).
pub const WS_IDLE_TIMEOUTS_TOTAL: &str = "beatbox_ws_idle_timeouts_total";

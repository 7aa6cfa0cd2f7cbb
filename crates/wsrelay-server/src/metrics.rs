//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
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

/// Sessions accepted (counter).
pub const SESSIONS_TOTAL: &str = "relay_sessions_total";
/// Sessions currently running (gauge).
pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
/// Upgrades refused or sessions closed before dialing (counter, labels: reason).
pub const SESSIONS_REJECTED_TOTAL: &str = "relay_sessions_rejected_total";
/// Upstream dial or transport failures (counter).
pub const UPSTREAM_ERRORS_TOTAL: &str = "relay_upstream_errors_total";
/// Payloads forwarded (counter, labels: direction).
pub const MESSAGES_TOTAL: &str = "relay_messages_total";
/// Pending queue overflows (counter, labels: policy).
pub const PENDING_OVERFLOW_TOTAL: &str = "relay_pending_overflow_total";
/// Session lifetime in seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";

/// `direction` label for client to upstream.
pub const DIRECTION_UPSTREAM: &str = "to_upstream";
/// `direction` label for upstream to client.
pub const DIRECTION_CLIENT: &str = "to_client";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_from_local_recorder() {
        // Local recorder; a global install would conflict across tests.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(SESSIONS_TOTAL).increment(2);
            metrics::counter!(MESSAGES_TOTAL, "direction" => DIRECTION_CLIENT).increment(1);
        });

        let output = render(&handle);
        assert!(output.contains("relay_sessions_total 2"));
        assert!(output.contains(r#"relay_messages_total{direction="to_client"} 1"#));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            SESSIONS_TOTAL,
            SESSIONS_ACTIVE,
            SESSIONS_REJECTED_TOTAL,
            UPSTREAM_ERRORS_TOTAL,
            MESSAGES_TOTAL,
            PENDING_OVERFLOW_TOTAL,
            SESSION_DURATION_SECONDS,
        ];
        for name in names {
            assert!(name.starts_with("relay_"));
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

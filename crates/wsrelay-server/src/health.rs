//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Relay sessions currently running.
    pub active_sessions: usize,
    /// Relay sessions accepted since startup.
    pub sessions_total: u64,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, active_sessions: usize, sessions_total: u64) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions,
        sessions_total,
    }
}

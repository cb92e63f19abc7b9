//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Clients currently registered with the hub.
    pub connected_clients: usize,
    /// Seconds since the server started.
    pub uptime_secs: u64,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connected_clients: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        connected_clients,
        uptime_secs: start_time.elapsed().as_secs(),
    }
}

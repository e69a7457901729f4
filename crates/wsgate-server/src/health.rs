//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::registry::ConnectionRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Connections with a running task.
    pub connections: usize,
    /// Accepted handshakes still waiting for the upgrade to finish.
    pub upgrading: usize,
    /// Frames dropped on full outbound queues of registered connections.
    pub outbound_dropped: u64,
}

/// Snapshot the registry into a health response.
pub fn health_check(start_time: Instant, registry: &ConnectionRegistry) -> HealthResponse {
    let connections = registry.active_len();
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        upgrading: registry.len().saturating_sub(connections),
        outbound_dropped: registry.dropped_total(),
    }
}

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
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Joined connections across all rooms.
    pub members: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, rooms: usize, members: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        rooms,
        members,
    }
}

use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of live rooms.
    pub rooms: usize,
    /// Number of pending timeouts and active intervals.
    pub timers: usize,
    /// Age in milliseconds of the oldest live timer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_timer_ms: Option<u64>,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(rooms: usize, timers: usize, oldest_timer_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            rooms,
            timers,
            oldest_timer_ms,
        }
    }

    /// Create a health response indicating the question source is unreachable.
    pub fn degraded(rooms: usize, timers: usize, oldest_timer_ms: Option<u64>) -> Self {
        Self {
            status: "degraded".to_string(),
            ..Self::ok(rooms, timers, oldest_timer_ms)
        }
    }
}

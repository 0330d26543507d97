//! `/health` and `/api/v1/ws/stats` bodies.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
}

pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub connected_clients: usize,
    /// `"active"` while the hub runs, else the hub state.
    pub status: &'static str,
}

pub fn ws_stats(connected_clients: usize, state: HubState) -> StatsResponse {
    StatsResponse {
        connected_clients,
        status: match state {
            HubState::Running => "active",
            other => other.as_str(),
        },
    }
}

//! Health check and statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::bridge::BridgeStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub live: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    /// Inbound events waiting for the application
    pub inbound_buffered: usize,
}

/// GET /health - 503 once the bridge is shutting down
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.bridge.stats();
    let shutting_down = state.bridge.is_shutting_down();

    let (code, status) = if shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else if stats.inbound.buffered >= stats.inbound.capacity {
        // Application is not keeping up; readers are stalled
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            connections: ConnectionHealthResponse {
                live: stats.connections.live_connections,
                max: stats.connections.max_connections,
                inbound_buffered: stats.inbound.buffered,
            },
        }),
    )
}

/// GET /stats - registry, inbound and router counters
pub async fn stats(State(state): State<AppState>) -> Json<BridgeStats> {
    Json(state.bridge.stats())
}

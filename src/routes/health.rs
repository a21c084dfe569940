//! `GET /api/health`: liveness plus live-feed gauges.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use time::OffsetDateTime;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_secs: u64,
    pub broadcasting: bool,
    pub connections: usize,
    pub channels: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.broadcast.registry();
    Json(HealthResponse {
        status: "OK",
        timestamp: OffsetDateTime::now_utc(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        broadcasting: state.broadcast.is_running(),
        connections: registry.connection_count(),
        channels: registry.channel_count(),
    })
}

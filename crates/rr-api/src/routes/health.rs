//! Liveness endpoint with connector health.

use axum::{extract::State, routing::get, Json, Router};
use std::time::Instant;

use crate::dto::{ComponentHealth, HealthResponse};
use crate::state::AppState;

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Records the process start for uptime reporting. Later calls are no-ops.
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// The process answers as long as it is up; a failing connector only
/// degrades the reported status.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is live", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    let components = state.engine.component_health().await;

    let status = if components.iter().all(|c| c.is_healthy()) {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        components: components.into_iter().map(ComponentHealth::from).collect(),
    })
}

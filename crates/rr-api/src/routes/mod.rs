//! API routes.

pub mod alerts;
pub mod approvals;
pub mod health;
pub mod incidents;
pub mod metrics;

use crate::state::AppState;
use axum::Router;

/// Creates the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .merge(health::routes())
        .merge(metrics::routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/alerts", alerts::routes())
        .nest("/incidents", incidents::routes())
        .nest("/approvals", approvals::routes())
}

//! Incident query and operator endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rr_core::{Incident, IncidentState, IncidentSummary, StoredEvent, CANCELLED_REASON};
use uuid::Uuid;
use validator::Validate;

use crate::dto::{CancelRequest, ListIncidentsQuery};
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_incidents))
        .route("/:id", get(get_incident))
        .route("/:id/history", get(get_history))
        .route("/:id/cancel", post(cancel_incident))
}

/// List incident summaries, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/incidents",
    params(ListIncidentsQuery),
    responses(
        (status = 200, description = "Incident summaries"),
        (status = 400, description = "Unknown state filter", body = crate::error::ErrorResponse)
    ),
    tag = "Incidents"
)]
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<ListIncidentsQuery>,
) -> Result<Json<Vec<IncidentSummary>>, ApiError> {
    let filter = query
        .state
        .as_deref()
        .map(|s| s.parse::<IncidentState>())
        .transpose()
        .map_err(|msg| ApiError::validation_field("state", "invalid_state", &msg))?;

    Ok(Json(state.engine.list(filter).await?))
}

/// Current snapshot of one incident, including its full history.
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}",
    params(("id" = Uuid, Path, description = "Incident id")),
    responses(
        (status = 200, description = "Incident snapshot"),
        (status = 404, description = "Unknown incident", body = crate::error::ErrorResponse)
    ),
    tag = "Incidents"
)]
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, ApiError> {
    Ok(Json(state.engine.get_incident(id).await?))
}

/// Ordered event log of one incident.
#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/history",
    params(("id" = Uuid, Path, description = "Incident id")),
    responses(
        (status = 200, description = "Events in sequence order"),
        (status = 404, description = "Unknown incident", body = crate::error::ErrorResponse)
    ),
    tag = "Incidents"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    Ok(Json(state.engine.history(id).await?))
}

/// Request an operator abort.
///
/// Takes effect at the next suspension point. An incident waiting for
/// approval is denied immediately.
#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/cancel",
    params(("id" = Uuid, Path, description = "Incident id")),
    request_body(content = CancelRequest, description = "Optional reason and operator"),
    responses(
        (status = 202, description = "Cancellation recorded"),
        (status = 404, description = "Unknown incident", body = crate::error::ErrorResponse),
        (status = 409, description = "Incident already finished", body = crate::error::ErrorResponse)
    ),
    tag = "Incidents"
)]
pub async fn cancel_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<(StatusCode, Json<Incident>), ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let reason = request.reason.as_deref().unwrap_or(CANCELLED_REASON);
    let incident = state
        .engine
        .cancel(id, reason, request.requested_by.clone())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(incident)))
}

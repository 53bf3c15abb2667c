//! Approval listing and decision callback.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rr_core::ApprovalRequest;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::dto::ApprovalDecisionRequest;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pending))
        .route("/:request_id", post(decide))
}

/// Pending approval requests, oldest first. Overdue requests are omitted.
#[utoipa::path(
    get,
    path = "/api/v1/approvals",
    responses((status = 200, description = "Pending approval requests")),
    tag = "Approvals"
)]
pub async fn list_pending(State(state): State<AppState>) -> Json<Vec<ApprovalRequest>> {
    Json(state.engine.pending_approvals().await)
}

/// Record a human decision.
///
/// Only the first decision on a request counts. A decision after the
/// deadline finds the request expired.
#[utoipa::path(
    post,
    path = "/api/v1/approvals/{request_id}",
    params(("request_id" = Uuid, Path, description = "Approval request id")),
    request_body = ApprovalDecisionRequest,
    responses(
        (status = 200, description = "Decision recorded"),
        (status = 404, description = "Unknown or expired request", body = crate::error::ErrorResponse),
        (status = 409, description = "Request already decided", body = crate::error::ErrorResponse)
    ),
    tag = "Approvals"
)]
pub async fn decide(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<ApprovalDecisionRequest>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    request.validate()?;

    let resolved = state
        .engine
        .resolve_approval(
            request_id,
            request.decision,
            request.decided_by,
            request.comment,
        )
        .await?;

    info!(
        request_id = %request_id,
        incident_id = %resolved.incident_id,
        status = %resolved.status,
        "Approval decision accepted"
    );
    Ok(Json(resolved))
}

//! Alert ingestion endpoint.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::debug;

use crate::dto::{AlertPayload, IngestResponse};
use crate::error::ApiError;
use crate::ingest::parse_alert;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(ingest_alert))
}

/// Ingest an alert.
///
/// Accepts the canonical shape or the legacy `alert_id`/`source_ip` shape.
/// A repeated `alertId` is answered with the incident it already opened.
#[utoipa::path(
    post,
    path = "/api/v1/alerts",
    request_body = AlertPayload,
    responses(
        (status = 202, description = "Incident created", body = IngestResponse),
        (status = 200, description = "Alert already known", body = IngestResponse),
        (status = 400, description = "Malformed alert", body = crate::error::ErrorResponse)
    ),
    tag = "Alerts"
)]
pub async fn ingest_alert(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let alert = parse_alert(&body)?;
    debug!(alert_id = %alert.alert_id, "Alert parsed");

    let outcome = state.engine.ingest(alert).await?;
    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(IngestResponse {
            accepted: true,
            incident_id: outcome.incident_id(),
            duplicate: outcome.is_duplicate(),
        }),
    ))
}

//! Approval callback tests.

use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use super::common::{get, high_legacy_alert, post_json, test_app, TestApp};

async fn pending_request_id(app: &TestApp) -> String {
    let (status, pending) = app.send(get("/api/v1/approvals")).await;
    assert_eq!(status, StatusCode::OK);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["target"], json!("10.0.0.50"));
    assert_eq!(pending[0]["status"], json!("pending"));
    pending[0]["requestId"].as_str().unwrap().to_string()
}

fn decision(decision: &str) -> Value {
    json!({"decision": decision, "decidedBy": "analyst@example.com"})
}

#[tokio::test]
async fn test_approved_request_remediates() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;
    let request_id = pending_request_id(&app).await;

    let (status, resolved) = app
        .send(post_json(
            &format!("/api/v1/approvals/{request_id}"),
            &decision("approved"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], json!("approved"));
    assert_eq!(resolved["decidedBy"], json!("analyst@example.com"));

    app.state.engine.drive(incident_id).await.unwrap();
    let (_, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(incident["state"], json!("CLOSED"));
    assert_eq!(incident["remediation"]["outcome"], json!("success"));
    assert_eq!(app.backend.get_call_count(), 1);
}

#[tokio::test]
async fn test_denied_request_never_remediates() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;
    let request_id = pending_request_id(&app).await;

    let (status, _) = app
        .send(post_json(
            &format!("/api/v1/approvals/{request_id}"),
            &decision("Denied"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    app.state.engine.drive(incident_id).await.unwrap();
    let (_, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(incident["state"], json!("CLOSED"));
    assert!(incident["remediation"].is_null());
    assert_eq!(app.backend.get_call_count(), 0);
}

#[tokio::test]
async fn test_second_decision_conflicts() {
    let app = test_app();
    app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;
    let request_id = pending_request_id(&app).await;
    let uri = format!("/api/v1/approvals/{request_id}");

    let (status, _) = app.send(post_json(&uri, &decision("approved"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(post_json(&uri, &decision("denied"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("CONFLICT"));
}

#[tokio::test]
async fn test_unknown_request_is_404() {
    let app = test_app();

    let (status, body) = app
        .send(post_json(
            &format!("/api/v1/approvals/{}", Uuid::new_v4()),
            &decision("approved"),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn test_swept_request_rejects_late_decision() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;
    let request_id = pending_request_id(&app).await;

    let later = chrono::Utc::now() + chrono::Duration::hours(2);
    assert_eq!(app.state.engine.expire_stale_approvals(later).await.unwrap(), 1);

    let (status, _) = app
        .send(post_json(
            &format!("/api/v1/approvals/{request_id}"),
            &decision("approved"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.state.engine.drive(incident_id).await.unwrap();
    let (_, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(incident["approval"]["status"], json!("expired"));
    assert_eq!(incident["state"], json!("CLOSED"));
    assert!(incident["remediation"].is_null());
    assert_eq!(app.backend.get_call_count(), 0);
}

#[tokio::test]
async fn test_invalid_decision_is_rejected() {
    let app = test_app();
    app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;
    let request_id = pending_request_id(&app).await;

    let (status, _) = app
        .send_raw(post_json(
            &format!("/api/v1/approvals/{request_id}"),
            &json!({"decision": "maybe"}),
        ))
        .await;
    assert!(status.is_client_error());

    // The request is still open.
    pending_request_id(&app).await;
}

//! Incident query and cancellation tests.

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use super::common::{get, high_legacy_alert, medium_alert, post_empty, post_json, test_app};

#[tokio::test]
async fn test_medium_alert_runs_to_completion() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&medium_alert("SEC-1")).await;

    let (status, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["state"], json!("CLOSED"));
    assert_eq!(incident["verdict"]["score"], json!(49.5));
    assert_eq!(incident["verdict"]["requiresApproval"], json!(false));
    assert_eq!(incident["remediation"]["outcome"], json!("success"));
    assert_eq!(incident["remediation"]["target"], json!("192.168.1.100"));
    assert!(incident["history"].as_array().unwrap().len() >= 6);
    assert_eq!(app.backend.get_call_count(), 1);
}

#[tokio::test]
async fn test_history_is_ordered() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&medium_alert("SEC-1")).await;

    let (status, history) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}/history")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = history.as_array().unwrap();
    assert_eq!(events[0]["eventType"], json!("received"));
    assert_eq!(events.last().unwrap()["eventType"], json!("closed"));
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"], json!(i as u64 + 1));
    }
}

#[tokio::test]
async fn test_unknown_incident_is_404() {
    let app = test_app();
    let id = Uuid::new_v4();

    let (status, body) = app.send(get(&format!("/api/v1/incidents/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NOT_FOUND"));

    let (status, _) = app
        .send(get(&format!("/api/v1/incidents/{id}/history")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(post_empty(&format!("/api/v1/incidents/{id}/cancel")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_filters_by_state() {
    let app = test_app();
    app.ingest_and_drive(&medium_alert("SEC-1")).await;
    let waiting = app.ingest_and_drive(&high_legacy_alert("SEC-2")).await;

    let (_, all) = app.send(get("/api/v1/incidents")).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (status, filtered) = app
        .send(get("/api/v1/incidents?state=awaiting_approval"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["incidentId"], json!(waiting.to_string()));

    let (status, body) = app.send(get("/api/v1/incidents?state=PANICKING")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_cancel_while_awaiting_approval_denies() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&high_legacy_alert("SEC-1")).await;

    let (status, incident) = app
        .send(post_json(
            &format!("/api/v1/incidents/{incident_id}/cancel"),
            &json!({"reason": "false positive", "requestedBy": "oncall"}),
        ))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(incident["state"], json!("DENIED"));
    assert_eq!(incident["approval"]["status"], json!("denied"));
    assert_eq!(incident["approval"]["decidedBy"], json!("oncall"));

    let (_, pending) = app.send(get("/api/v1/approvals")).await;
    assert!(pending.as_array().unwrap().is_empty());
    assert_eq!(app.backend.get_call_count(), 0);
}

#[tokio::test]
async fn test_cancel_closed_incident_conflicts() {
    let app = test_app();
    let incident_id = app.ingest_and_drive(&medium_alert("SEC-1")).await;

    let (status, body) = app
        .send(post_empty(&format!("/api/v1/incidents/{incident_id}/cancel")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("CONFLICT"));
}

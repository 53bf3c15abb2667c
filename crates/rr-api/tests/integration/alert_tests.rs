//! Alert ingestion tests.

use axum::{body::Body, http::StatusCode};
use serde_json::json;

use super::common::{get, high_legacy_alert, medium_alert, post_json, test_app};

#[tokio::test]
async fn test_new_alert_is_accepted() {
    let app = test_app();

    let (status, body) = app
        .send(post_json("/api/v1/alerts", &medium_alert("SEC-1")))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], json!(true));
    assert_eq!(body["duplicate"], json!(false));
    assert!(body["incidentId"].is_string());
}

#[tokio::test]
async fn test_repeated_alert_id_returns_existing_incident() {
    let app = test_app();

    let (_, first) = app
        .send(post_json("/api/v1/alerts", &medium_alert("SEC-1")))
        .await;
    let (status, second) = app
        .send(post_json("/api/v1/alerts", &medium_alert("SEC-1")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["duplicate"], json!(true));
    assert_eq!(second["incidentId"], first["incidentId"]);

    let (_, list) = app.send(get("/api/v1/incidents")).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_legacy_shape_is_accepted() {
    let app = test_app();

    let incident_id = app
        .ingest_and_drive(&json!({
            "alert_id": "SEC-2025-001",
            "type": "MALWARE_DETECTED",
            "source_ip": "192.168.1.100",
            "indicators": {
                "file_hash": "d41d8cd98f00b204e9800998ecf8427e",
                "domain": "malicious-site.com"
            },
            "timestamp": "2025-10-18T12:00:00Z"
        }))
        .await;

    let (status, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["alert"]["alertId"], json!("SEC-2025-001"));
    assert_eq!(incident["alert"]["sourceIndicator"]["value"], json!("192.168.1.100"));
    assert_eq!(incident["enrichments"].as_object().unwrap().len(), 3);
    // Worst reputation malicious (+50), max confidence 0.98 (+29.4).
    assert_eq!(incident["verdict"]["score"], json!(79.4));
    assert_eq!(incident["verdict"]["severity"], json!("HIGH"));
    assert_eq!(incident["state"], json!("AWAITING_APPROVAL"));
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let app = test_app();

    let request = axum::extract::Request::builder()
        .method("POST")
        .uri("/api/v1/alerts")
        .header("Content-Type", "application/json")
        .body(Body::from("not valid json"))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let app = test_app();

    let (status, _) = app
        .send(post_json(
            "/api/v1/alerts",
            &json!({"alertId": "SEC-1", "type": "PHISHING"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(post_json(
            "/api/v1/alerts",
            &json!({
                "alertId": "",
                "type": "PHISHING",
                "sourceIndicator": {"value": "10.0.0.50", "kind": "ip"},
                "observedAt": "2025-10-18T12:00:00Z"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_unknown_legacy_indicator_is_rejected() {
    let app = test_app();

    let mut alert = high_legacy_alert("SEC-9");
    alert["indicators"] = json!({"mutex": "Global\\evil"});
    let (status, body) = app.send(post_json("/api/v1/alerts", &alert)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["details"]["indicators.mutex"][0]["code"],
        json!("unknown_indicator")
    );

    let (_, list) = app.send(get("/api/v1/incidents")).await;
    assert!(list.as_array().unwrap().is_empty());
}

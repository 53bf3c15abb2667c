//! API over the SQLite state store.

use axum::http::StatusCode;
use rr_core::{create_pool, run_migrations, SharedStateStore, SqliteStateStore};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::common::{get, high_legacy_alert, medium_alert, post_json, test_app_with_store};

async fn sqlite_store() -> SharedStateStore {
    let url = format!("sqlite:file:api_test_{}?mode=memory&cache=shared", Uuid::new_v4());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteStateStore::new(pool))
}

#[tokio::test]
async fn test_full_flow_on_sqlite() {
    let app = test_app_with_store(sqlite_store().await);

    let incident_id = app.ingest_and_drive(&medium_alert("SEC-1")).await;
    let (status, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["state"], json!("CLOSED"));

    let (status, dup) = app
        .send(post_json("/api/v1/alerts", &medium_alert("SEC-1")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dup["incidentId"], json!(incident_id.to_string()));
}

#[tokio::test]
async fn test_approval_flow_on_sqlite() {
    let app = test_app_with_store(sqlite_store().await);
    let incident_id = app.ingest_and_drive(&high_legacy_alert("SEC-2")).await;

    let (_, pending) = app.send(get("/api/v1/approvals")).await;
    let request_id = pending[0]["requestId"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(post_json(
            &format!("/api/v1/approvals/{request_id}"),
            &json!({"decision": "approved"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    app.state.engine.drive(incident_id).await.unwrap();
    let (_, incident) = app
        .send(get(&format!("/api/v1/incidents/{incident_id}")))
        .await;
    assert_eq!(incident["state"], json!("CLOSED"));
    assert_eq!(incident["remediation"]["outcome"], json!("success"));
}

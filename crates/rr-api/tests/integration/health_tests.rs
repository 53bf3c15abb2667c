//! Health and metrics endpoint tests.

use axum::http::StatusCode;
use metrics_exporter_prometheus::PrometheusBuilder;
use rr_api::{ApiServer, ApiServerConfig};
use rr_connectors::MockBackendBehavior;
use serde_json::json;

use super::common::{get, test_app, TestApp};

#[tokio::test]
async fn test_health() {
    let app = test_app();

    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));

    let components = body["components"].as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0]["componentType"], json!("threat_intel"));
    assert_eq!(components[1]["componentType"], json!("remediation"));
    assert_eq!(components[1]["name"], json!("firewall"));
    assert!(components.iter().all(|c| c["status"] == json!("healthy")));
}

#[tokio::test]
async fn test_health_degrades_with_failing_backend() {
    let app = test_app();
    app.backend
        .set_behavior(MockBackendBehavior::AlwaysTransient)
        .await;

    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("degraded"));

    let backend = &body["components"][1];
    assert_eq!(backend["status"], json!("unhealthy"));
    assert!(backend["detail"].is_string());
    assert_eq!(body["components"][0]["status"], json!("healthy"));
}

#[tokio::test]
async fn test_metrics_without_recorder_is_404() {
    let app = test_app();

    let (status, _) = app.send_raw(get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_renders_installed_handle() {
    let base = test_app();
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("rr_alerts_received_total").increment(3);
    });

    let state = base.state.clone().with_prometheus_handle(handle);
    let app = TestApp {
        router: ApiServer::new(
            state.clone(),
            ApiServerConfig {
                enable_swagger: false,
                ..ApiServerConfig::default()
            },
        )
        .router(),
        state,
        backend: base.backend,
    };

    let (status, body) = app.send_raw(get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("rr_alerts_received_total 3"), "{body}");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = test_app();

    let request = axum::extract::Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

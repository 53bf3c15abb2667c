//! Common test utilities for integration tests.

use axum::{
    body::Body,
    http::{Method, StatusCode},
    Router,
};
use rr_actions::{ExecutorConfig, RemediationExecutor};
use rr_api::{ApiServer, ApiServerConfig, AppState};
use rr_connectors::{MockRemediationBackend, MockThreatIntelClient};
use rr_core::{
    EngineConfig, InMemoryStateStore, SeverityClassifier, SharedStateStore, WorkflowEngine,
};
use rr_policy::ApprovalGateway;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<MockRemediationBackend>,
}

impl TestApp {
    /// Sends a request and parses the JSON body (`Value::Null` when empty).
    pub async fn send(&self, request: axum::extract::Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        if body.is_empty() {
            return (status, Value::Null);
        }
        let parsed = serde_json::from_slice(&body).unwrap_or_else(|e| {
            panic!(
                "Failed to parse response: {} - Body: {:?}",
                e,
                String::from_utf8_lossy(&body)
            )
        });
        (status, parsed)
    }

    /// Sends a request and returns the body as text.
    pub async fn send_raw(&self, request: axum::extract::Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    /// Posts an alert, drives the incident and returns its id.
    pub async fn ingest_and_drive(&self, alert: &Value) -> Uuid {
        let (status, body) = self.send(post_json("/api/v1/alerts", alert)).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        let incident_id: Uuid = body["incidentId"].as_str().unwrap().parse().unwrap();
        self.state.engine.drive(incident_id).await.unwrap();
        incident_id
    }
}

/// App over an in-memory store.
pub fn test_app() -> TestApp {
    test_app_with_store(Arc::new(InMemoryStateStore::new()))
}

pub fn test_app_with_store(store: SharedStateStore) -> TestApp {
    let backend = Arc::new(MockRemediationBackend::new("firewall"));
    let executor = Arc::new(RemediationExecutor::new(
        store.clone(),
        backend.clone(),
        ExecutorConfig::default(),
    ));
    let engine = WorkflowEngine::new(
        store,
        Arc::new(MockThreatIntelClient::with_reference_data()),
        Arc::new(SeverityClassifier::new()),
        Arc::new(ApprovalGateway::default()),
        executor,
        EngineConfig {
            spawn_workers: false,
            ..EngineConfig::default()
        },
    );
    let state = AppState::new(engine);
    let router = ApiServer::new(
        state.clone(),
        ApiServerConfig {
            enable_swagger: false,
            ..ApiServerConfig::default()
        },
    )
    .router();

    TestApp {
        router,
        state,
        backend,
    }
}

pub fn get(uri: &str) -> axum::extract::Request<Body> {
    axum::extract::Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> axum::extract::Request<Body> {
    axum::extract::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> axum::extract::Request<Body> {
    axum::extract::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Suspicious IP only: MEDIUM, remediated without approval.
pub fn medium_alert(alert_id: &str) -> Value {
    json!({
        "alertId": alert_id,
        "type": "SUSPICIOUS_LOGIN",
        "sourceIndicator": {"value": "192.168.1.100", "kind": "ip"},
        "observedAt": "2025-10-18T12:00:00Z"
    })
}

/// Malicious IP in the legacy shape: HIGH, approval required.
pub fn high_legacy_alert(alert_id: &str) -> Value {
    json!({
        "alert_id": alert_id,
        "type": "MALWARE_DETECTED",
        "source_ip": "10.0.0.50",
        "indicators": {},
        "timestamp": "2025-10-18T12:00:00Z"
    })
}

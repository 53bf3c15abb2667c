//! The approval gateway driving real incidents through the workflow engine
//! while the state store drops writes.
//!
//! ```bash
//! cargo test --package rr-policy --test gateway_workflow_tests
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rr_connectors::MockThreatIntelClient;
use rr_core::fixtures::{sample_alert, FlakyStore, ScriptedRemediation};
use rr_core::{
    Alert, ApprovalDecision, ApprovalError, ApprovalService, ApprovalStatus, EngineConfig,
    Incident, IncidentState, InMemoryStateStore, Indicator, RemediationOutcome,
    SeverityClassifier, SharedStateStore, WorkflowEngine, WorkflowError,
};
use rr_policy::ApprovalGateway;

struct Setup {
    engine: WorkflowEngine,
    gateway: Arc<ApprovalGateway>,
    remediation: Arc<ScriptedRemediation>,
}

/// Engine over a store that loses the first `ApprovalResolved` write.
fn setup() -> Setup {
    let store: SharedStateStore = Arc::new(
        FlakyStore::new(Arc::new(InMemoryStateStore::new())).fail_appends("approval_resolved", 1),
    );
    let gateway = Arc::new(ApprovalGateway::default());
    let remediation = Arc::new(ScriptedRemediation::new(
        store.clone(),
        RemediationOutcome::Success,
    ));
    let engine = WorkflowEngine::new(
        store,
        Arc::new(MockThreatIntelClient::with_reference_data()),
        Arc::new(SeverityClassifier::new()),
        gateway.clone(),
        remediation.clone(),
        EngineConfig {
            approval_timeout: Duration::from_secs(60),
            spawn_workers: false,
            ..EngineConfig::default()
        },
    );
    Setup {
        engine,
        gateway,
        remediation,
    }
}

/// Malicious IP: HIGH, approval required.
fn high_alert(alert_id: &str) -> Alert {
    let mut alert = sample_alert(alert_id);
    alert.source_indicator = Indicator::ip("10.0.0.50");
    alert.raw_indicators.clear();
    alert
}

async fn awaiting_approval(s: &Setup) -> Incident {
    let id = s.engine.ingest(high_alert("A-1")).await.unwrap().incident_id();
    let incident = s.engine.drive(id).await.unwrap();
    assert_eq!(incident.state, IncidentState::AwaitingApproval);
    incident
}

#[tokio::test]
async fn test_expiry_lost_by_store_is_written_on_next_sweep() {
    let s = setup();
    let waiting = awaiting_approval(&s).await;
    let request_id = waiting.approval.as_ref().unwrap().request_id;
    let later = Utc::now() + chrono::Duration::hours(2);

    assert_eq!(s.engine.expire_stale_approvals(later).await.unwrap(), 0);
    let still_waiting = s.engine.get_incident(waiting.incident_id).await.unwrap();
    assert_eq!(still_waiting.state, IncidentState::AwaitingApproval);
    assert_eq!(
        s.gateway.get(request_id).await.unwrap().status,
        ApprovalStatus::Expired
    );

    assert_eq!(s.engine.expire_stale_approvals(later).await.unwrap(), 1);
    let incident = s.engine.drive(waiting.incident_id).await.unwrap();
    assert_eq!(incident.state, IncidentState::Closed);
    assert_eq!(
        incident.approval.as_ref().unwrap().status,
        ApprovalStatus::Expired
    );
    assert!(incident.remediation.is_none());
    assert_eq!(s.remediation.performed(), 0);
}

#[tokio::test]
async fn test_late_decision_after_lost_expiry_still_denies() {
    let s = setup();
    let waiting = awaiting_approval(&s).await;
    let request_id = waiting.approval.as_ref().unwrap().request_id;

    s.engine
        .expire_stale_approvals(Utc::now() + chrono::Duration::hours(2))
        .await
        .unwrap();

    let err = s
        .engine
        .resolve_approval(request_id, ApprovalDecision::Approved, Some("analyst".to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Approval(ApprovalError::AlreadyDecided {
            status: ApprovalStatus::Expired,
            ..
        })
    ));

    let incident = s.engine.get_incident(waiting.incident_id).await.unwrap();
    assert_eq!(incident.state, IncidentState::Denied);
    let incident = s.engine.drive(waiting.incident_id).await.unwrap();
    assert_eq!(incident.state, IncidentState::Closed);
    assert_eq!(s.remediation.performed(), 0);
}

#[tokio::test]
async fn test_repeated_decision_writes_the_lost_approval() {
    let s = setup();
    let waiting = awaiting_approval(&s).await;
    let request_id = waiting.approval.as_ref().unwrap().request_id;

    let err = s
        .engine
        .resolve_approval(request_id, ApprovalDecision::Approved, Some("analyst".to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Store(_)));
    assert_eq!(
        s.gateway.get(request_id).await.unwrap().status,
        ApprovalStatus::Approved
    );

    let err = s
        .engine
        .resolve_approval(request_id, ApprovalDecision::Approved, Some("analyst".to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Approval(ApprovalError::AlreadyDecided { .. })
    ));

    let incident = s.engine.drive(waiting.incident_id).await.unwrap();
    assert_eq!(incident.state, IncidentState::Closed);
    assert!(incident.remediation.is_some());
    assert_eq!(s.remediation.performed(), 1);
}

//! Shared builders for tests across the workspace.

use crate::db::{commit_with_retry, IncidentStateStore, SharedStateStore, StoreError};
use crate::events::{IncidentEvent, StoredEvent};
use crate::incident::{
    Alert, ApprovalDecision, ApprovalRequest, Indicator, RemediationOutcome, RemediationRecord,
    Severity, SeverityVerdict,
};
use crate::plan::plan_remediation;
use crate::traits::{
    ApprovalError, ApprovalService, RemediationAction, RemediationError, RemediationService,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_connectors::ActionKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// 2025-01-01T00:00:00Z, so fixture values compare equal across calls.
fn fixed_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// A malware alert on 192.168.1.100 that also carries a hash and a domain.
pub fn sample_alert(alert_id: &str) -> Alert {
    Alert {
        alert_id: alert_id.to_string(),
        alert_type: "MALWARE_DETECTED".to_string(),
        source_indicator: Indicator::ip("192.168.1.100"),
        observed_at: fixed_time(),
        raw_indicators: vec![
            Indicator::hash("d41d8cd98f00b204e9800998ecf8427e"),
            Indicator::domain("malicious-site.com"),
        ],
        host: None,
    }
}

/// A verdict at the lower bound of the given tier.
pub fn verdict(severity: Severity) -> SeverityVerdict {
    let score = match severity {
        Severity::Low => 0.0,
        Severity::Medium => 40.0,
        Severity::High => 60.0,
        Severity::Critical => 80.0,
    };
    SeverityVerdict {
        severity,
        score,
        requires_approval: severity >= Severity::High,
        reasons: Vec::new(),
    }
}

/// A successful quarantine record.
pub fn remediation_record(action_id: &str) -> RemediationRecord {
    RemediationRecord {
        action_id: action_id.to_string(),
        kind: ActionKind::Quarantine,
        target: "192.168.1.100".to_string(),
        outcome: RemediationOutcome::Success,
        evidence: vec!["Added 192.168.1.100 to blocklist".to_string()],
        external_session_id: Some("session-1".to_string()),
        recording_url: None,
        screenshot_url: None,
        attempts: 1,
        error: None,
        completed_at: fixed_time(),
    }
}

/// Creates an incident for `sample_alert(alert_id)` and returns its id.
///
/// # Panics
///
/// Panics if the store rejects the append.
pub async fn open_incident(store: &dyn IncidentStateStore, alert_id: &str) -> Uuid {
    let incident_id = Uuid::new_v4();
    if let Err(e) = store
        .append(incident_id, 0, IncidentEvent::Received { alert: sample_alert(alert_id) })
        .await
    {
        panic!("failed to open incident for {alert_id}: {e}");
    }
    incident_id
}

/// Opens an incident for `alert` and walks it to REMEDIATING with a
/// medium verdict, returning the action that was started.
///
/// # Panics
///
/// Panics if any append is rejected or the alert has no actionable target.
pub async fn remediating_incident(
    store: &dyn IncidentStateStore,
    alert: Alert,
) -> (Uuid, RemediationAction) {
    let incident_id = Uuid::new_v4();
    let indicators = alert.indicators();
    let steps = vec![
        IncidentEvent::Received { alert },
        IncidentEvent::EnrichmentStarted { indicators },
        IncidentEvent::Classified {
            enrichments: Vec::new(),
            degraded: Vec::new(),
            verdict: verdict(Severity::Medium),
        },
    ];
    for (version, event) in steps.into_iter().enumerate() {
        if let Err(e) = store.append(incident_id, version as u64, event).await {
            panic!("failed to build incident {incident_id}: {e}");
        }
    }

    let incident = match store.read_current(incident_id).await {
        Ok(incident) => incident,
        Err(e) => panic!("failed to read incident {incident_id}: {e}"),
    };
    let Some(action) = plan_remediation(&incident) else {
        panic!("alert has no actionable target");
    };
    let started = IncidentEvent::RemediationStarted {
        action_id: action.action_id.clone(),
        kind: action.kind,
        target: action.target.clone(),
        claimed_by: None,
    };
    if let Err(e) = store.append(incident_id, incident.version, started).await {
        panic!("failed to start remediation on {incident_id}: {e}");
    }
    (incident_id, action)
}

/// Approval service keeping requests in a map. Never notifies anyone.
#[derive(Default)]
pub struct RecordingApprovals {
    requests: Mutex<HashMap<Uuid, ApprovalRequest>>,
    submitted: AtomicU64,
}

impl RecordingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `submit` calls.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalService for RecordingApprovals {
    fn build_request(
        &self,
        incident_id: Uuid,
        target: &str,
        severity: Severity,
        justification: &str,
        timeout: Duration,
    ) -> ApprovalRequest {
        ApprovalRequest::pending(incident_id, target, severity, justification, timeout)
    }

    async fn submit(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.restore(request).await;
        Ok(())
    }

    async fn restore(&self, request: &ApprovalRequest) {
        self.requests
            .lock()
            .await
            .insert(request.request_id, request.clone());
    }

    async fn resolve(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(&request_id)
            .ok_or(ApprovalError::NotFound(request_id))?;
        if !request.is_pending() {
            return Err(ApprovalError::AlreadyDecided {
                request_id,
                status: request.status,
            });
        }
        request.decide(decision.into(), decided_by, comment, Utc::now());
        Ok(request.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Vec<ApprovalRequest> {
        let mut requests = self.requests.lock().await;
        requests
            .values_mut()
            .filter(|r| r.is_overdue(now))
            .map(|r| {
                r.decide(crate::incident::ApprovalStatus::Expired, None, None, now);
                r.clone()
            })
            .collect()
    }

    async fn get(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.requests.lock().await.get(&request_id).cloned()
    }

    async fn list_pending(&self) -> Vec<ApprovalRequest> {
        self.requests
            .lock()
            .await
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }
}

/// Remediation service that records a fixed outcome without any backend.
pub struct ScriptedRemediation {
    store: SharedStateStore,
    outcome: RemediationOutcome,
    calls: AtomicU64,
}

impl ScriptedRemediation {
    pub fn new(store: SharedStateStore, outcome: RemediationOutcome) -> Self {
        Self {
            store,
            outcome,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of actions actually performed (idempotent replays excluded).
    pub fn performed(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationService for ScriptedRemediation {
    async fn execute(
        &self,
        incident_id: Uuid,
        action: &RemediationAction,
    ) -> Result<RemediationRecord, RemediationError> {
        if let Some(record) = self.store.find_remediation(&action.action_id).await? {
            return Ok(record);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let record = RemediationRecord {
            action_id: action.action_id.clone(),
            kind: action.kind,
            target: action.target.clone(),
            outcome: self.outcome,
            evidence: vec![format!("{} {}", action.kind, action.target)],
            external_session_id: Some(format!("scripted-{}", self.performed())),
            recording_url: None,
            screenshot_url: None,
            attempts: 1,
            error: (self.outcome != RemediationOutcome::Success)
                .then(|| "scripted failure".to_string()),
            completed_at: Utc::now(),
        };

        commit_with_retry(self.store.as_ref(), incident_id, 5, |incident| {
            let pending = incident
                .pending_action
                .as_ref()
                .is_some_and(|p| p.action_id == action.action_id);
            Ok(pending.then(|| IncidentEvent::RemediationCompleted {
                record: record.clone(),
            }))
        })
        .await
        .map_err(|e| RemediationError::Audit(e.to_string()))?;
        Ok(record)
    }
}

/// Store that loses its connection on chosen writes and reads.
///
/// Delegates everything else to the wrapped store.
pub struct FlakyStore {
    inner: SharedStateStore,
    append_failures: std::sync::Mutex<HashMap<&'static str, u32>>,
    read_failures_after: std::sync::Mutex<HashMap<&'static str, u32>>,
    pending_read_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: SharedStateStore) -> Self {
        Self {
            inner,
            append_failures: std::sync::Mutex::new(HashMap::new()),
            read_failures_after: std::sync::Mutex::new(HashMap::new()),
            pending_read_failures: AtomicU32::new(0),
        }
    }

    /// Fails the next `times` appends of `event_type`.
    pub fn fail_appends(self, event_type: &'static str, times: u32) -> Self {
        if let Ok(mut failures) = self.append_failures.lock() {
            failures.insert(event_type, times);
        }
        self
    }

    /// Fails the next `times` reads after an `event_type` append succeeds.
    pub fn fail_reads_after(self, event_type: &'static str, times: u32) -> Self {
        if let Ok(mut failures) = self.read_failures_after.lock() {
            failures.insert(event_type, times);
        }
        self
    }

    fn connection_lost() -> StoreError {
        StoreError::Connection("connection reset by peer".to_string())
    }
}

#[async_trait]
impl IncidentStateStore for FlakyStore {
    async fn append(
        &self,
        incident_id: Uuid,
        expected_version: u64,
        event: IncidentEvent,
    ) -> Result<StoredEvent, StoreError> {
        let event_type = event.event_type();
        let fail = match self.append_failures.lock() {
            Ok(mut failures) => match failures.get_mut(event_type) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if fail {
            return Err(Self::connection_lost());
        }

        let stored = self.inner.append(incident_id, expected_version, event).await?;
        if let Ok(mut failures) = self.read_failures_after.lock() {
            if let Some(times) = failures.remove(event_type) {
                self.pending_read_failures.fetch_add(times, Ordering::SeqCst);
            }
        }
        Ok(stored)
    }

    async fn read_history(&self, incident_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let armed = self
            .pending_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(Self::connection_lost());
        }
        self.inner.read_history(incident_id).await
    }

    async fn find_incident_by_alert(&self, alert_id: &str) -> Result<Option<Uuid>, StoreError> {
        self.inner.find_incident_by_alert(alert_id).await
    }

    async fn find_remediation(
        &self,
        action_id: &str,
    ) -> Result<Option<RemediationRecord>, StoreError> {
        self.inner.find_remediation(action_id).await
    }

    async fn list_incident_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        self.inner.list_incident_ids().await
    }

    async fn purge(&self, incident_id: Uuid) -> Result<bool, StoreError> {
        self.inner.purge(incident_id).await
    }
}

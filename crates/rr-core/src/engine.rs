//! The workflow engine.
//!
//! Drives each incident through the state machine, one step at a time:
//!
//! 1. read the current snapshot from the state store
//! 2. do the work for its state (enrich, classify, plan, remediate)
//! 3. commit the resulting event with [`commit_with_retry`]
//!
//! and repeats until the incident reaches a suspension point: waiting for an
//! approval decision, owned by another worker, or closed. Nothing is held
//! while an incident waits for approval; the decision callback and the
//! expiry sweep both re-enter through the store.

use crate::classifier::SeverityScorer;
use crate::db::{commit_with_retry, SharedStateStore, StoreError};
use crate::enrichment::{Enricher, EnrichmentConfig};
use crate::events::{IncidentEvent, StoredEvent};
use crate::incident::{
    Alert, ApprovalDecision, ApprovalRequest, ApprovalStatus, Incident, IncidentState,
    IncidentSummary,
};
use crate::plan::{action_for, plan_remediation};
use crate::traits::{
    ApprovalError, ApprovalService, ComponentStatus, RemediationError, RemediationService,
};
use crate::workflow::WorkflowError;
use chrono::{DateTime, Utc};
use rr_connectors::ThreatIntelClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Failure reason recorded when an operator abort is observed.
pub const CANCELLED_REASON: &str = "cancelled by operator";
/// Failure reason recorded when the alert names nothing to act on.
pub const NO_TARGET_REASON: &str = "no actionable target";
/// Failure reason recorded when a remediation was in flight during a crash.
pub const INTERRUPTED_REASON: &str = "interrupted remediation; manual verification required";

/// Configuration for the workflow engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enrichment: EnrichmentConfig,
    /// How long a human has to decide before the request expires.
    pub approval_timeout: Duration,
    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,
    /// Re-read/re-decide cycles allowed per commit.
    pub max_conflict_retries: u32,
    /// Drive incidents on spawned tasks. When false, callers drive them
    /// with [`WorkflowEngine::drive`].
    pub spawn_workers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enrichment: EnrichmentConfig::default(),
            approval_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
            max_conflict_retries: 5,
            spawn_workers: true,
        }
    }
}

/// Result of ingesting an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new incident was created.
    Created(Uuid),
    /// The alert id was already known; the delivery was folded into the
    /// existing incident.
    Duplicate(Uuid),
}

impl IngestOutcome {
    pub fn incident_id(&self) -> Uuid {
        match self {
            IngestOutcome::Created(id) | IngestOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

/// What [`WorkflowEngine::recover`] found in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Incidents handed back to a worker.
    pub resumed: usize,
    /// Pending approvals re-registered with the gateway.
    pub approvals_restored: usize,
    /// Remediations in flight at crash time, now failed for manual review.
    pub interrupted: usize,
    /// Incidents whose history did not replay.
    pub corrupt: usize,
}

enum Step {
    Continue,
    Suspend,
}

struct EngineInner {
    store: SharedStateStore,
    enricher: Enricher,
    threat_intel: Arc<dyn ThreatIntelClient>,
    scorer: Arc<dyn SeverityScorer>,
    approvals: Arc<dyn ApprovalService>,
    remediation: Arc<dyn RemediationService>,
    config: EngineConfig,
    /// Written into every remediation this engine claims.
    worker_id: String,
    /// Incidents currently being driven in this process, with a flag asking
    /// the driver for one more pass.
    active: Mutex<HashMap<Uuid, bool>>,
}

/// Coordinates enrichment, classification, approval and remediation for
/// every incident. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        store: SharedStateStore,
        threat_intel: Arc<dyn ThreatIntelClient>,
        scorer: Arc<dyn SeverityScorer>,
        approvals: Arc<dyn ApprovalService>,
        remediation: Arc<dyn RemediationService>,
        config: EngineConfig,
    ) -> Self {
        let enricher = Enricher::new(threat_intel.clone(), config.enrichment.clone());
        Self {
            inner: Arc::new(EngineInner {
                store,
                enricher,
                threat_intel,
                scorer,
                approvals,
                remediation,
                config,
                worker_id: format!("engine-{}", Uuid::new_v4()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.inner.store
    }

    /// Identifies this engine in the remediations it claims.
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Health of the threat intelligence source and the remediation backend.
    pub async fn component_health(&self) -> Vec<ComponentStatus> {
        let (threat_intel, remediation) = tokio::join!(
            ComponentStatus::of(self.inner.threat_intel.as_ref()),
            self.inner.remediation.health()
        );
        vec![threat_intel, remediation]
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Creates an incident for the alert, or folds a repeated delivery of a
    /// known alert id into the existing incident.
    #[instrument(skip(self, alert), fields(alert_id = %alert.alert_id))]
    pub async fn ingest(&self, alert: Alert) -> Result<IngestOutcome, WorkflowError> {
        metrics::counter!("rr_alerts_received_total").increment(1);

        let store = &self.inner.store;
        if let Some(existing) = store.find_incident_by_alert(&alert.alert_id).await? {
            return Ok(self.fold_duplicate(existing).await);
        }

        let incident_id = Uuid::new_v4();
        let alert_id = alert.alert_id.clone();
        match store.append(incident_id, 0, IncidentEvent::Received { alert }).await {
            Ok(_) => {
                metrics::counter!("rr_incidents_created_total").increment(1);
                info!(incident_id = %incident_id, alert_id = %alert_id, "Incident created");
                self.schedule(incident_id);
                Ok(IngestOutcome::Created(incident_id))
            }
            // Lost a race with a concurrent delivery of the same alert.
            Err(StoreError::DuplicateAlert { incident_id, .. }) => {
                Ok(self.fold_duplicate(incident_id).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fold_duplicate(&self, incident_id: Uuid) -> IngestOutcome {
        metrics::counter!("rr_alerts_deduplicated_total").increment(1);
        info!(incident_id = %incident_id, "Duplicate alert folded into existing incident");

        let recorded = self
            .commit(incident_id, |incident| {
                Ok((!incident.is_closed()).then(|| IncidentEvent::DuplicateReceived {
                    delivered_at: Utc::now(),
                }))
            })
            .await;
        if let Err(e) = recorded {
            warn!(incident_id = %incident_id, error = %e, "Failed to record duplicate delivery");
        }
        IngestOutcome::Duplicate(incident_id)
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    fn schedule(&self, incident_id: Uuid) {
        if !self.inner.config.spawn_workers {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.drive(incident_id).await {
                error!(incident_id = %incident_id, error = %e, "Workflow step failed");
            }
        });
    }

    /// Advances the incident until it reaches a suspension point and returns
    /// the snapshot there.
    ///
    /// If another call is already driving the incident in this process, asks
    /// it for one more pass and returns the current snapshot.
    pub async fn drive(&self, incident_id: Uuid) -> Result<Incident, WorkflowError> {
        let Some(mut claim) = DriveClaim::acquire(&self.inner, incident_id) else {
            debug!(incident_id = %incident_id, "Incident already being driven");
            return self.get_incident(incident_id).await;
        };

        loop {
            let result = self.advance(incident_id).await;
            if !claim.finish_or_rerun() {
                return result;
            }
        }
    }

    #[instrument(skip(self), fields(incident_id = %incident_id))]
    async fn advance(&self, incident_id: Uuid) -> Result<Incident, WorkflowError> {
        // Set once this pass commits RemediationStarted or takes over a claim
        // an earlier pass of this engine dropped.
        let mut claimed: Option<String> = None;

        loop {
            let incident = self.get_incident(incident_id).await?;
            let step = match incident.state {
                IncidentState::Received => self.start_enrichment(&incident).await?,
                IncidentState::Enriching => self.classify(&incident).await?,
                IncidentState::Classified => self.after_classification(&incident, &mut claimed).await?,
                IncidentState::AwaitingApproval => Step::Suspend,
                IncidentState::Remediating => self.remediate(&incident, &mut claimed).await?,
                IncidentState::Remediated | IncidentState::Denied | IncidentState::Failed => {
                    self.close(&incident).await?
                }
                IncidentState::Closed => Step::Suspend,
            };

            if let Step::Suspend = step {
                debug!(state = %incident.state, "Incident suspended");
                return Ok(incident);
            }
        }
    }

    async fn start_enrichment(&self, incident: &Incident) -> Result<Step, WorkflowError> {
        let indicators = incident.alert.indicators();
        self.commit(incident.incident_id, |current| {
            Ok((current.state == IncidentState::Received).then(|| {
                IncidentEvent::EnrichmentStarted {
                    indicators: indicators.clone(),
                }
            }))
        })
        .await?;
        Ok(Step::Continue)
    }

    async fn classify(&self, incident: &Incident) -> Result<Step, WorkflowError> {
        let outcome = self
            .inner
            .enricher
            .enrich(&incident.alert.indicators())
            .await;
        let verdict = self.inner.scorer.classify(&incident.alert, &outcome.results);

        info!(
            incident_id = %incident.incident_id,
            severity = %verdict.severity,
            score = verdict.score,
            requires_approval = verdict.requires_approval,
            degraded = outcome.degraded.len(),
            "Incident classified"
        );

        self.commit(incident.incident_id, |current| {
            Ok((current.state == IncidentState::Enriching).then(|| IncidentEvent::Classified {
                enrichments: outcome.results.clone(),
                degraded: outcome.degraded.clone(),
                verdict: verdict.clone(),
            }))
        })
        .await?;
        Ok(Step::Continue)
    }

    async fn after_classification(
        &self,
        incident: &Incident,
        claimed: &mut Option<String>,
    ) -> Result<Step, WorkflowError> {
        if incident.cancel_requested.is_some() {
            return self.fail(incident, CANCELLED_REASON).await;
        }

        let verdict = incident
            .verdict
            .as_ref()
            .ok_or_else(|| WorkflowError::CorruptHistory {
                incident_id: incident.incident_id,
                reason: "classified without a verdict".to_string(),
            })?;

        if verdict.requires_approval {
            self.request_approval(incident).await
        } else {
            self.start_remediation(incident, claimed).await
        }
    }

    async fn request_approval(&self, incident: &Incident) -> Result<Step, WorkflowError> {
        let Some(action) = plan_remediation(incident) else {
            return self.fail(incident, NO_TARGET_REASON).await;
        };
        let Some(verdict) = incident.verdict.as_ref() else {
            return Ok(Step::Continue);
        };

        let justification = format!(
            "{} alert {}: {} {} ({} severity, score {}; {})",
            incident.alert.alert_type,
            incident.alert.alert_id,
            action.kind,
            action.target,
            verdict.severity,
            verdict.score,
            verdict.reasons.join("; ")
        );
        let request = self.inner.approvals.build_request(
            incident.incident_id,
            &action.target,
            verdict.severity,
            &justification,
            self.inner.config.approval_timeout,
        );

        let (_, committed) = self
            .commit(incident.incident_id, |current| {
                let open = current.state == IncidentState::Classified
                    && current.approval.is_none()
                    && current.cancel_requested.is_none();
                Ok(open.then(|| IncidentEvent::ApprovalRequested {
                    request: request.clone(),
                }))
            })
            .await?;

        if committed.is_some() {
            metrics::counter!("rr_approvals_requested_total").increment(1);
            info!(
                incident_id = %incident.incident_id,
                request_id = %request.request_id,
                expires_at = %request.expires_at,
                "Approval requested"
            );

            if let Err(e) = self.inner.approvals.submit(&request).await {
                // Nobody can approve a request the gateway does not hold.
                error!(request_id = %request.request_id, error = %e, "Approval submission failed, denying");
                let mut denied = request.clone();
                denied.decide(
                    ApprovalStatus::Denied,
                    Some("system".to_string()),
                    Some(e.to_string()),
                    Utc::now(),
                );
                self.record_resolution(&denied).await?;
            }
        }
        Ok(Step::Continue)
    }

    async fn start_remediation(
        &self,
        incident: &Incident,
        claimed: &mut Option<String>,
    ) -> Result<Step, WorkflowError> {
        if incident.cancel_requested.is_some() {
            return self.fail(incident, CANCELLED_REASON).await;
        }
        let Some(action) = plan_remediation(incident) else {
            return self.fail(incident, NO_TARGET_REASON).await;
        };

        let (_, committed) = self
            .commit(incident.incident_id, |current| {
                let gated = current.verdict.as_ref().map_or(true, |v| v.requires_approval);
                let ready = match current.state {
                    IncidentState::Classified => !gated,
                    IncidentState::Remediating => true,
                    _ => false,
                };
                let free = current.pending_action.is_none()
                    && current.remediation.is_none()
                    && current.cancel_requested.is_none();
                Ok((ready && free).then(|| IncidentEvent::RemediationStarted {
                    action_id: action.action_id.clone(),
                    kind: action.kind,
                    target: action.target.clone(),
                    claimed_by: Some(self.inner.worker_id.clone()),
                }))
            })
            .await?;

        if committed.is_some() {
            info!(
                incident_id = %incident.incident_id,
                action_id = %action.action_id,
                kind = %action.kind,
                target = %action.target,
                "Remediation started"
            );
            *claimed = Some(action.action_id);
        }
        Ok(Step::Continue)
    }

    async fn remediate(
        &self,
        incident: &Incident,
        claimed: &mut Option<String>,
    ) -> Result<Step, WorkflowError> {
        let Some(pending) = incident.pending_action.as_ref() else {
            if incident.remediation.is_none() {
                return self.start_remediation(incident, claimed).await;
            }
            return Ok(Step::Suspend);
        };

        if claimed.as_deref() != Some(pending.action_id.as_str()) {
            // Only an action this engine claimed on an earlier pass, with no
            // backend attempt recorded, may be taken over.
            let ours = pending.claimed_by.as_deref() == Some(self.inner.worker_id.as_str());
            if !ours || pending.attempts > 0 {
                debug!(action_id = %pending.action_id, "Remediation owned by another worker");
                return Ok(Step::Suspend);
            }
            info!(action_id = %pending.action_id, "Resuming claimed remediation");
            *claimed = Some(pending.action_id.clone());
        }

        let action = action_for(pending);
        match self
            .inner
            .remediation
            .execute(incident.incident_id, &action)
            .await
        {
            Ok(record) => {
                info!(
                    incident_id = %incident.incident_id,
                    action_id = %record.action_id,
                    outcome = %record.outcome,
                    attempts = record.attempts,
                    "Remediation finished"
                );
            }
            Err(e) => {
                error!(
                    incident_id = %incident.incident_id,
                    action_id = %action.action_id,
                    error = %e,
                    "Remediation could not be completed"
                );
                let (reason, record) = match e {
                    RemediationError::Unrecorded { record, reason } => (
                        format!("remediation applied but not recorded: {reason}"),
                        Some(*record),
                    ),
                    other => (format!("remediation error: {other}"), None),
                };
                self.commit(incident.incident_id, |current| {
                    let still_pending = current
                        .pending_action
                        .as_ref()
                        .is_some_and(|p| p.action_id == action.action_id);
                    Ok(still_pending.then(|| IncidentEvent::Failed {
                        reason: reason.clone(),
                        record: record.clone(),
                    }))
                })
                .await?;
            }
        }
        *claimed = None;
        Ok(Step::Continue)
    }

    async fn fail(&self, incident: &Incident, reason: &str) -> Result<Step, WorkflowError> {
        let from = incident.state;
        let (_, committed) = self
            .commit(incident.incident_id, |current| {
                let unchanged = current.state == from && current.pending_action.is_none();
                Ok(unchanged.then(|| IncidentEvent::Failed {
                    reason: reason.to_string(),
                    record: None,
                }))
            })
            .await?;
        if committed.is_some() {
            warn!(incident_id = %incident.incident_id, reason, "Incident failed");
        }
        Ok(Step::Continue)
    }

    async fn close(&self, incident: &Incident) -> Result<Step, WorkflowError> {
        let (closed, committed) = self
            .commit(incident.incident_id, |current| {
                Ok(current.state.is_outcome().then_some(IncidentEvent::Closed))
            })
            .await?;

        if committed.is_some() {
            metrics::counter!("rr_incidents_closed_total", "outcome" => incident.state.as_str())
                .increment(1);
            info!(
                incident_id = %closed.incident_id,
                outcome = %incident.state,
                "Incident closed"
            );
        }
        Ok(Step::Continue)
    }

    // ------------------------------------------------------------------
    // Approval re-entry
    // ------------------------------------------------------------------

    /// Applies a human decision to a pending approval request.
    ///
    /// A decision arriving after the deadline records the expiry instead and
    /// fails with [`ApprovalError::Expired`]. A request that is already
    /// decided fails with [`ApprovalError::AlreadyDecided`], after the earlier
    /// decision is written to the incident if the store missed it.
    #[instrument(skip(self, decided_by, comment), fields(request_id = %request_id))]
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let approvals = &self.inner.approvals;
        let resolved = match approvals.resolve(request_id, decision, decided_by, comment).await {
            Ok(resolved) => resolved,
            Err(ApprovalError::Expired(id)) => {
                if let Some(expired) = approvals.get(id).await {
                    self.record_resolution(&expired).await?;
                }
                return Err(ApprovalError::Expired(id).into());
            }
            Err(e @ ApprovalError::AlreadyDecided { .. }) => {
                if let Some(decided) = approvals.get(request_id).await {
                    self.record_resolution(&decided).await?;
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.record_resolution(&resolved).await?;
        Ok(resolved)
    }

    /// Commits a terminal approval to its incident and resumes it.
    async fn record_resolution(&self, request: &ApprovalRequest) -> Result<bool, WorkflowError> {
        let (_, committed) = self
            .commit(request.incident_id, |current| {
                let matches = current
                    .approval
                    .as_ref()
                    .is_some_and(|a| a.is_pending() && a.request_id == request.request_id);
                Ok(matches.then(|| IncidentEvent::ApprovalResolved {
                    request: request.clone(),
                }))
            })
            .await?;

        if committed.is_none() {
            return Ok(false);
        }

        metrics::counter!("rr_approvals_resolved_total", "status" => request.status.to_string())
            .increment(1);
        info!(
            incident_id = %request.incident_id,
            request_id = %request.request_id,
            status = %request.status,
            decided_by = request.decided_by.as_deref().unwrap_or("-"),
            "Approval resolved"
        );
        self.schedule(request.incident_id);
        Ok(true)
    }

    /// Expires every approval whose deadline has passed. Expiry is a denial.
    ///
    /// Works from the store, not the gateway: any incident still waiting on
    /// a request gets the gateway's decision written if one exists, or an
    /// expiry once the deadline is past. A write that fails is retried on
    /// the next sweep. Remediations this engine claimed and then dropped are
    /// handed back to a worker. Returns the number of expiries recorded.
    pub async fn expire_stale_approvals(&self, now: DateTime<Utc>) -> Result<usize, WorkflowError> {
        self.inner.approvals.expire_due(now).await;

        let mut expired = 0;
        for incident_id in self.inner.store.list_incident_ids().await? {
            let incident = match self.inner.store.read_current(incident_id).await {
                Ok(incident) => incident,
                Err(e) => {
                    warn!(incident_id = %incident_id, error = %e, "Skipping unreadable incident");
                    continue;
                }
            };

            match incident.state {
                IncidentState::AwaitingApproval => {
                    let Some(resolution) = self.settle_approval(&incident, now).await else {
                        continue;
                    };
                    match self.record_resolution(&resolution).await {
                        Ok(true) if resolution.status == ApprovalStatus::Expired => expired += 1,
                        Ok(_) => {}
                        Err(e) => warn!(
                            request_id = %resolution.request_id,
                            status = %resolution.status,
                            error = %e,
                            "Failed to record approval resolution, retrying on next sweep"
                        ),
                    }
                }
                IncidentState::Remediating => self.resume_dropped_claim(&incident),
                _ => {}
            }
        }

        if expired > 0 {
            info!(expired, "Expired stale approvals");
        }
        Ok(expired)
    }

    /// The terminal request to write for an incident waiting on approval,
    /// if its request has been decided or its deadline has passed.
    async fn settle_approval(
        &self,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> Option<ApprovalRequest> {
        let pending = incident.approval.as_ref().filter(|a| a.is_pending())?;
        if let Some(decided) = self.inner.approvals.get(pending.request_id).await {
            if !decided.is_pending() {
                return Some(decided);
            }
        }
        if !pending.is_overdue(now) {
            return None;
        }
        let mut expired = pending.clone();
        expired.decide(ApprovalStatus::Expired, None, None, now);
        Some(expired)
    }

    fn resume_dropped_claim(&self, incident: &Incident) {
        let worker_id = self.inner.worker_id.as_str();
        let ours = incident
            .pending_action
            .as_ref()
            .is_some_and(|p| p.attempts == 0 && p.claimed_by.as_deref() == Some(worker_id));
        let idle = !self
            .inner
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&incident.incident_id);
        if ours && idle {
            debug!(incident_id = %incident.incident_id, "Rescheduling dropped remediation");
            self.schedule(incident.incident_id);
        }
    }

    /// Runs the expiry sweep every `sweep_interval` until `shutdown` flips.
    pub fn spawn_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let period = self.inner.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Starting approval expiry sweep");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = engine.expire_stale_approvals(Utc::now()).await {
                            error!(error = %e, "Approval sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Stopping approval expiry sweep");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Requests pending approvals from the gateway.
    pub async fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.inner.approvals.list_pending().await
    }

    // ------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------

    /// Records an operator abort.
    ///
    /// An incident waiting for approval is denied right away. Otherwise the
    /// abort takes effect at the next suspension point; a remediation already
    /// in flight finishes and is recorded.
    #[instrument(skip(self, reason, requested_by), fields(incident_id = %incident_id))]
    pub async fn cancel(
        &self,
        incident_id: Uuid,
        reason: &str,
        requested_by: Option<String>,
    ) -> Result<Incident, WorkflowError> {
        let (incident, committed) = self
            .commit(incident_id, |current| {
                if current.is_closed() {
                    return Err(WorkflowError::AlreadyClosed(incident_id));
                }
                if current.state.is_outcome() {
                    return Err(WorkflowError::UnexpectedEvent {
                        event: "cancel_requested",
                        state: current.state,
                    });
                }
                if current.cancel_requested.is_some() {
                    return Ok(None);
                }
                Ok(Some(IncidentEvent::CancelRequested {
                    reason: reason.to_string(),
                    requested_by: requested_by.clone(),
                }))
            })
            .await?;

        if committed.is_some() {
            info!(incident_id = %incident_id, reason, "Cancellation requested");
        }

        if let Some(pending) = incident.approval.as_ref().filter(|a| a.is_pending()) {
            let decided_by = requested_by.unwrap_or_else(|| "operator".to_string());
            let denied = match self
                .inner
                .approvals
                .resolve(
                    pending.request_id,
                    ApprovalDecision::Denied,
                    Some(decided_by.clone()),
                    Some(reason.to_string()),
                )
                .await
            {
                Ok(denied) => Some(denied),
                Err(ApprovalError::NotFound(_)) => {
                    let mut denied = pending.clone();
                    denied.decide(
                        ApprovalStatus::Denied,
                        Some(decided_by),
                        Some(reason.to_string()),
                        Utc::now(),
                    );
                    Some(denied)
                }
                Err(ApprovalError::Expired(id)) => self.inner.approvals.get(id).await,
                // Someone else decided first and records it.
                Err(_) => None,
            };
            if let Some(denied) = denied {
                self.record_resolution(&denied).await?;
            }
        } else {
            self.schedule(incident_id);
        }

        self.get_incident(incident_id).await
    }

    /// Resumes every open incident after a restart.
    ///
    /// Pending approvals are handed back to the gateway. A remediation that
    /// was in flight has an unknown effect on the target, so unless a record
    /// for its action id exists it is failed for manual verification rather
    /// than run again.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport, WorkflowError> {
        let mut report = RecoveryReport::default();

        for incident_id in self.inner.store.list_incident_ids().await? {
            let incident = match self.inner.store.read_current(incident_id).await {
                Ok(incident) => incident,
                Err(e) => {
                    error!(incident_id = %incident_id, error = %e, "Incident does not replay");
                    report.corrupt += 1;
                    continue;
                }
            };

            match incident.state {
                IncidentState::Closed => {}
                IncidentState::AwaitingApproval => {
                    if let Some(request) = incident.approval.as_ref().filter(|a| a.is_pending()) {
                        self.inner.approvals.restore(request).await;
                        report.approvals_restored += 1;
                    }
                }
                IncidentState::Remediating if incident.pending_action.is_some() => {
                    self.settle_interrupted(&incident).await?;
                    report.interrupted += 1;
                    self.schedule(incident_id);
                }
                _ => {
                    report.resumed += 1;
                    self.schedule(incident_id);
                }
            }
        }

        info!(
            resumed = report.resumed,
            approvals_restored = report.approvals_restored,
            interrupted = report.interrupted,
            corrupt = report.corrupt,
            "Recovery complete"
        );
        Ok(report)
    }

    async fn settle_interrupted(&self, incident: &Incident) -> Result<(), WorkflowError> {
        let Some(pending) = incident.pending_action.as_ref() else {
            return Ok(());
        };
        let recorded = self.inner.store.find_remediation(&pending.action_id).await?;
        if recorded.is_none() {
            warn!(
                incident_id = %incident.incident_id,
                action_id = %pending.action_id,
                "Remediation was in flight at shutdown"
            );
        }

        self.commit(incident.incident_id, |current| {
            let still_pending = current
                .pending_action
                .as_ref()
                .is_some_and(|p| p.action_id == pending.action_id);
            if !still_pending {
                return Ok(None);
            }
            Ok(Some(match &recorded {
                Some(record) => IncidentEvent::RemediationCompleted {
                    record: record.clone(),
                },
                None => IncidentEvent::Failed {
                    reason: INTERRUPTED_REASON.to_string(),
                    record: None,
                },
            }))
        })
        .await?;
        Ok(())
    }

    /// Deletes closed incidents last updated before `cutoff`. Open incidents
    /// are never purged.
    #[instrument(skip(self))]
    pub async fn purge_closed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, WorkflowError> {
        let mut purged = 0;
        for incident_id in self.inner.store.list_incident_ids().await? {
            let incident = match self.inner.store.read_current(incident_id).await {
                Ok(incident) => incident,
                Err(e) => {
                    warn!(incident_id = %incident_id, error = %e, "Skipping unreadable incident");
                    continue;
                }
            };
            if incident.is_closed()
                && incident.updated_at < cutoff
                && self.inner.store.purge(incident_id).await?
            {
                purged += 1;
            }
        }
        metrics::counter!("rr_incidents_purged_total").increment(purged as u64);
        info!(purged, cutoff = %cutoff, "Retention purge complete");
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_incident(&self, incident_id: Uuid) -> Result<Incident, WorkflowError> {
        match self.inner.store.read_current(incident_id).await {
            Ok(incident) => Ok(incident),
            Err(StoreError::NotFound(id)) => Err(WorkflowError::IncidentNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history(&self, incident_id: Uuid) -> Result<Vec<StoredEvent>, WorkflowError> {
        let history = self.inner.store.read_history(incident_id).await?;
        if history.is_empty() {
            return Err(WorkflowError::IncidentNotFound(incident_id));
        }
        Ok(history)
    }

    /// Summaries of all incidents, oldest first, optionally in one state.
    pub async fn list(
        &self,
        state: Option<IncidentState>,
    ) -> Result<Vec<IncidentSummary>, WorkflowError> {
        let mut summaries = Vec::new();
        for incident_id in self.inner.store.list_incident_ids().await? {
            match self.inner.store.read_current(incident_id).await {
                Ok(incident) if state.map_or(true, |s| s == incident.state) => {
                    summaries.push(incident.summary())
                }
                Ok(_) => {}
                Err(e) => warn!(incident_id = %incident_id, error = %e, "Skipping unreadable incident"),
            }
        }
        Ok(summaries)
    }

    async fn commit<F>(
        &self,
        incident_id: Uuid,
        decide: F,
    ) -> Result<(Incident, Option<StoredEvent>), WorkflowError>
    where
        F: FnMut(&Incident) -> Result<Option<IncidentEvent>, WorkflowError> + Send,
    {
        commit_with_retry(
            self.inner.store.as_ref(),
            incident_id,
            self.inner.config.max_conflict_retries,
            decide,
        )
        .await
    }
}

/// Marks an incident as driven by the current task until dropped.
struct DriveClaim<'a> {
    inner: &'a EngineInner,
    incident_id: Uuid,
    released: bool,
}

impl<'a> DriveClaim<'a> {
    fn acquire(inner: &'a EngineInner, incident_id: Uuid) -> Option<Self> {
        let mut active = inner.active.lock().unwrap_or_else(|p| p.into_inner());
        match active.get_mut(&incident_id) {
            Some(rerun) => {
                *rerun = true;
                None
            }
            None => {
                active.insert(incident_id, false);
                Some(Self {
                    inner,
                    incident_id,
                    released: false,
                })
            }
        }
    }

    /// Releases the claim, unless someone asked for another pass meanwhile.
    /// Returns true when the caller must run again.
    fn finish_or_rerun(&mut self) -> bool {
        let mut active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rerun) = active.get_mut(&self.incident_id) {
            if *rerun {
                *rerun = false;
                return true;
            }
        }
        active.remove(&self.incident_id);
        self.released = true;
        false
    }
}

impl Drop for DriveClaim<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
            active.remove(&self.incident_id);
        }
    }
}

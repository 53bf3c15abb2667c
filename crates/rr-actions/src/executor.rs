//! Exactly-once remediation executor.
//!
//! Every action carries a stable `action_id`. Before calling the backend the
//! executor looks the id up in the state store's remediation index and
//! returns the stored record if one exists, so a retried or replayed action
//! is never applied twice. Calls for the same id are serialized in-process.
//!
//! Each attempt is bounded by a hard timeout. Transient backend errors are
//! retried with backoff; a rejection by the backend is final.

use async_trait::async_trait;
use chrono::Utc;
use rr_connectors::{
    BackendError, BackendOutcome, BackendReport, BackendRequest, RemediationBackend,
};
use rr_core::{
    commit_with_retry, ComponentStatus, IncidentEvent, RemediationAction, RemediationError,
    RemediationOutcome, RemediationRecord, RemediationService, RetryPolicy, SharedStateStore,
    WorkflowError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Configuration for the remediation executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Backoff for transient backend and store failures. `max_attempts`
    /// bounds all attempts.
    pub retry: RetryPolicy,
    /// Upper bound for a single backend call.
    pub hard_timeout: Duration,
    /// Re-read/re-decide cycles allowed when recording results.
    pub max_conflict_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            hard_timeout: Duration::from_secs(300),
            max_conflict_retries: 10,
        }
    }
}

/// How one attempt ended.
enum Attempt {
    Done(BackendReport),
    Failed(BackendError),
}

/// Applies remediation actions through a [`RemediationBackend`] and records
/// the result on the incident.
pub struct RemediationExecutor {
    store: SharedStateStore,
    backend: Arc<dyn RemediationBackend>,
    config: ExecutorConfig,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RemediationExecutor {
    pub fn new(
        store: SharedStateStore,
        backend: Arc<dyn RemediationBackend>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn lock_for(&self, action_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(action_id.to_string()).or_default())
    }

    fn release(&self, action_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if locks
            .get(action_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(action_id);
        }
    }

    async fn ensure_pending(&self, incident_id: Uuid, action_id: &str) -> Result<(), RemediationError> {
        let incident = self.store.read_current(incident_id).await?;
        let pending = incident
            .pending_action
            .as_ref()
            .is_some_and(|p| p.action_id == action_id);
        if pending {
            Ok(())
        } else {
            Err(RemediationError::NotPending {
                incident_id,
                action_id: action_id.to_string(),
            })
        }
    }

    async fn attempt(&self, request: &BackendRequest) -> Attempt {
        let call = self.backend.perform_action(request);
        match tokio::time::timeout(self.config.hard_timeout, call).await {
            Ok(Ok(report)) => Attempt::Done(report),
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::Failed(BackendError::Transient(format!(
                "backend call timed out after {}s",
                self.config.hard_timeout.as_secs()
            ))),
        }
    }

    /// Appends the event `make` builds while `action_id` is still pending,
    /// retrying transient store failures with the configured backoff.
    async fn append_audited<F>(
        &self,
        incident_id: Uuid,
        action_id: &str,
        make: F,
    ) -> Result<(), WorkflowError>
    where
        F: Fn() -> IncidentEvent + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = commit_with_retry(
                self.store.as_ref(),
                incident_id,
                self.config.max_conflict_retries,
                |incident| {
                    let pending = incident
                        .pending_action
                        .as_ref()
                        .is_some_and(|p| p.action_id == action_id);
                    Ok(pending.then(&make))
                },
            )
            .await;

            match result {
                Ok(_) => return Ok(()),
                Err(WorkflowError::Store(e))
                    if e.is_transient() && self.config.retry.should_retry(attempt) =>
                {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        action_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Audit write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Appends one attempt to the incident log. The final record carries the
    /// attempt count, so a write that still fails after retries is logged
    /// and skipped.
    async fn record_attempt(
        &self,
        incident_id: Uuid,
        action_id: &str,
        attempt: u32,
        error: Option<&BackendError>,
    ) {
        let result = self
            .append_audited(incident_id, action_id, || IncidentEvent::RemediationAttempted {
                action_id: action_id.to_string(),
                attempt,
                error: error.map(ToString::to_string),
                transient: error.is_some_and(BackendError::is_transient),
            })
            .await;

        if let Err(e) = result {
            error!(action_id, attempt, error = %e, "Failed to record remediation attempt");
        }
    }

    async fn record_completion(
        &self,
        incident_id: Uuid,
        record: &RemediationRecord,
    ) -> Result<(), RemediationError> {
        self.append_audited(incident_id, &record.action_id, || {
            IncidentEvent::RemediationCompleted {
                record: record.clone(),
            }
        })
        .await
        .map_err(|e| {
            error!(
                action_id = %record.action_id,
                session_id = record.external_session_id.as_deref().unwrap_or("-"),
                error = %e,
                "Remediation ran but its record could not be written"
            );
            RemediationError::Unrecorded {
                record: Box::new(record.clone()),
                reason: e.to_string(),
            }
        })
    }

    async fn run(
        &self,
        incident_id: Uuid,
        action: &RemediationAction,
    ) -> Result<RemediationRecord, RemediationError> {
        if let Some(record) = self.store.find_remediation(&action.action_id).await? {
            metrics::counter!("rr_remediation_idempotent_hits_total").increment(1);
            info!(
                action_id = %action.action_id,
                outcome = %record.outcome,
                "Action already performed, returning recorded result"
            );
            return Ok(record);
        }
        self.ensure_pending(incident_id, &action.action_id).await?;

        let request = BackendRequest {
            action_id: action.action_id.clone(),
            kind: action.kind,
            target: action.target.clone(),
            params: action.params.clone(),
        };

        let started = Instant::now();
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            metrics::counter!("rr_remediation_attempts_total", "kind" => action.kind.as_str())
                .increment(1);
            debug!(attempt, "Calling remediation backend");

            match self.attempt(&request).await {
                Attempt::Done(report) => {
                    self.record_attempt(incident_id, &action.action_id, attempt, None)
                        .await;
                    break Ok(report);
                }
                Attempt::Failed(e) => {
                    self.record_attempt(incident_id, &action.action_id, attempt, Some(&e))
                        .await;
                    if e.is_transient() && self.config.retry.should_retry(attempt) {
                        let delay = self.config.retry.delay_for(attempt);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient backend failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break Err(e);
                }
            }
        };
        metrics::histogram!("rr_remediation_duration_seconds", "kind" => action.kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let record = build_record(action, attempt, result);
        metrics::counter!("rr_remediation_outcomes_total", "outcome" => record.outcome.to_string())
            .increment(1);

        self.record_completion(incident_id, &record).await?;
        match record.outcome {
            RemediationOutcome::Success => info!(
                action_id = %record.action_id,
                attempts = record.attempts,
                session_id = record.external_session_id.as_deref().unwrap_or("-"),
                "Remediation succeeded"
            ),
            _ => error!(
                action_id = %record.action_id,
                outcome = %record.outcome,
                attempts = record.attempts,
                error = record.error.as_deref().unwrap_or("-"),
                "Remediation did not succeed"
            ),
        }
        Ok(record)
    }
}

fn build_record(
    action: &RemediationAction,
    attempts: u32,
    result: Result<BackendReport, BackendError>,
) -> RemediationRecord {
    let base = RemediationRecord {
        action_id: action.action_id.clone(),
        kind: action.kind,
        target: action.target.clone(),
        outcome: RemediationOutcome::Failed,
        evidence: Vec::new(),
        external_session_id: None,
        recording_url: None,
        screenshot_url: None,
        attempts,
        error: None,
        completed_at: Utc::now(),
    };

    match result {
        Ok(report) => {
            let outcome = match report.outcome {
                BackendOutcome::Success => RemediationOutcome::Success,
                BackendOutcome::Failed => RemediationOutcome::Failed,
                BackendOutcome::PartiallyApplied => RemediationOutcome::PartiallyApplied,
            };
            RemediationRecord {
                outcome,
                error: (outcome != RemediationOutcome::Success)
                    .then(|| format!("backend reported {outcome}")),
                evidence: report.evidence,
                external_session_id: Some(report.session_id),
                recording_url: report.recording_url,
                screenshot_url: report.screenshot_url,
                completed_at: report.completed_at,
                ..base
            }
        }
        Err(BackendError::Transient(reason)) => RemediationRecord {
            error: Some(format!("gave up after {attempts} attempts: {reason}")),
            ..base
        },
        Err(BackendError::Semantic(reason)) => RemediationRecord {
            error: Some(reason),
            ..base
        },
    }
}

#[async_trait]
impl RemediationService for RemediationExecutor {
    #[instrument(
        skip(self, action),
        fields(
            incident_id = %incident_id,
            action_id = %action.action_id,
            kind = %action.kind,
            target = %action.target
        )
    )]
    async fn execute(
        &self,
        incident_id: Uuid,
        action: &RemediationAction,
    ) -> Result<RemediationRecord, RemediationError> {
        let lock = self.lock_for(&action.action_id);
        let result = {
            let _guard = lock.lock().await;
            self.run(incident_id, action).await
        };
        drop(lock);
        self.release(&action.action_id);
        result
    }

    async fn health(&self) -> ComponentStatus {
        ComponentStatus::of(self.backend.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rr_connectors::ActionKind;

    fn action(kind: ActionKind, target: &str) -> RemediationAction {
        let mut params = HashMap::new();
        params.insert(kind.target_param().to_string(), target.to_string());
        RemediationAction {
            action_id: "act-1".to_string(),
            kind,
            target: target.to_string(),
            params,
        }
    }

    fn report(outcome: BackendOutcome) -> BackendReport {
        BackendReport {
            outcome,
            evidence: vec!["Added 10.0.0.50 to blocklist".to_string()],
            session_id: "session-7".to_string(),
            recording_url: Some("https://recordings.example.com/session-7.mp4".to_string()),
            screenshot_url: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_success_record_keeps_audit_trail() {
        let record = build_record(
            &action(ActionKind::Quarantine, "10.0.0.50"),
            2,
            Ok(report(BackendOutcome::Success)),
        );
        assert_eq!(record.outcome, RemediationOutcome::Success);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.external_session_id.as_deref(), Some("session-7"));
        assert!(record.recording_url.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_partial_outcome_is_not_success() {
        let record = build_record(
            &action(ActionKind::Isolate, "ws-042"),
            1,
            Ok(report(BackendOutcome::PartiallyApplied)),
        );
        assert_eq!(record.outcome, RemediationOutcome::PartiallyApplied);
        assert_eq!(record.error.as_deref(), Some("backend reported partially_applied"));
    }

    #[test]
    fn test_rejection_preserves_reason() {
        let record = build_record(
            &action(ActionKind::BlockDomain, "malicious-site.com"),
            1,
            Err(BackendError::Semantic("domain is allow-listed".to_string())),
        );
        assert_eq!(record.outcome, RemediationOutcome::Failed);
        assert_eq!(record.error.as_deref(), Some("domain is allow-listed"));
        assert!(record.evidence.is_empty());
    }

    #[test]
    fn test_exhausted_retries_mention_attempts() {
        let record = build_record(
            &action(ActionKind::Quarantine, "10.0.0.50"),
            3,
            Err(BackendError::Transient("connection reset".to_string())),
        );
        assert_eq!(record.outcome, RemediationOutcome::Failed);
        assert!(record.error.unwrap().contains("3 attempts"));
    }
}

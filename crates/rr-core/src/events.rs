//! Incident events and the fold that turns them into a snapshot.
//!
//! Every change to an incident is one [`IncidentEvent`]. The state store
//! assigns it a per-incident sequence number and timestamp, producing a
//! [`StoredEvent`]. The current snapshot of an incident is
//! `Incident::replay(history)`, a left fold of [`Incident::apply`] over the
//! stored events.

use crate::incident::{
    Alert, ApprovalRequest, ApprovalStatus, Incident, IncidentState, Indicator, PendingAction,
    RemediationOutcome, RemediationRecord, SeverityVerdict,
};
use crate::workflow::{check_transition, WorkflowError};
use chrono::{DateTime, Utc};
use rr_connectors::{ActionKind, EnrichmentResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Something that happened to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum IncidentEvent {
    /// First event of every incident.
    Received { alert: Alert },
    /// The same alert id was delivered again.
    DuplicateReceived { delivered_at: DateTime<Utc> },
    /// Lookups dispatched for these indicators.
    EnrichmentStarted { indicators: Vec<Indicator> },
    /// Enrichment finished and the classifier produced a verdict.
    Classified {
        enrichments: Vec<EnrichmentResult>,
        degraded: Vec<Indicator>,
        verdict: SeverityVerdict,
    },
    ApprovalRequested { request: ApprovalRequest },
    /// The approval request reached a terminal status.
    ApprovalResolved { request: ApprovalRequest },
    /// A remediation action was claimed for execution.
    RemediationStarted {
        action_id: String,
        kind: ActionKind,
        target: String,
        /// Engine instance that owns the action.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claimed_by: Option<String>,
    },
    /// One backend call, successful or not.
    RemediationAttempted {
        action_id: String,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        transient: bool,
    },
    RemediationCompleted { record: RemediationRecord },
    CancelRequested {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_by: Option<String>,
    },
    Failed {
        reason: String,
        /// Result of an action that was applied but could not be recorded
        /// as completed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record: Option<RemediationRecord>,
    },
    Closed,
}

impl IncidentEvent {
    /// Stable name of the event variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            IncidentEvent::Received { .. } => "received",
            IncidentEvent::DuplicateReceived { .. } => "duplicate_received",
            IncidentEvent::EnrichmentStarted { .. } => "enrichment_started",
            IncidentEvent::Classified { .. } => "classified",
            IncidentEvent::ApprovalRequested { .. } => "approval_requested",
            IncidentEvent::ApprovalResolved { .. } => "approval_resolved",
            IncidentEvent::RemediationStarted { .. } => "remediation_started",
            IncidentEvent::RemediationAttempted { .. } => "remediation_attempted",
            IncidentEvent::RemediationCompleted { .. } => "remediation_completed",
            IncidentEvent::CancelRequested { .. } => "cancel_requested",
            IncidentEvent::Failed { .. } => "failed",
            IncidentEvent::Closed => "closed",
        }
    }

    /// The remediation record this event carries, for the action-id index.
    pub fn remediation_record(&self) -> Option<&RemediationRecord> {
        match self {
            IncidentEvent::RemediationCompleted { record } => Some(record),
            IncidentEvent::Failed { record, .. } => record.as_ref(),
            _ => None,
        }
    }

    /// The state this event moves the incident into, given its current state.
    ///
    /// `None` means the event only records data.
    pub fn target_state(&self, current: IncidentState) -> Option<IncidentState> {
        match self {
            IncidentEvent::Received { .. } => Some(IncidentState::Received),
            IncidentEvent::EnrichmentStarted { .. } => Some(IncidentState::Enriching),
            IncidentEvent::Classified { .. } => Some(IncidentState::Classified),
            IncidentEvent::ApprovalRequested { .. } => Some(IncidentState::AwaitingApproval),
            IncidentEvent::ApprovalResolved { request } => match request.status {
                ApprovalStatus::Approved => Some(IncidentState::Remediating),
                _ => Some(IncidentState::Denied),
            },
            IncidentEvent::RemediationStarted { .. } => {
                if current == IncidentState::Remediating {
                    None
                } else {
                    Some(IncidentState::Remediating)
                }
            }
            IncidentEvent::RemediationCompleted { record } => match record.outcome {
                RemediationOutcome::Success => Some(IncidentState::Remediated),
                _ => Some(IncidentState::Failed),
            },
            IncidentEvent::Failed { .. } => Some(IncidentState::Failed),
            IncidentEvent::Closed => Some(IncidentState::Closed),
            IncidentEvent::DuplicateReceived { .. }
            | IncidentEvent::RemediationAttempted { .. }
            | IncidentEvent::CancelRequested { .. } => None,
        }
    }
}

/// An event as committed to the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub incident_id: Uuid,
    /// 1-based, contiguous within one incident.
    pub sequence: u64,
    pub event_type: String,
    pub payload: IncidentEvent,
    pub timestamp: DateTime<Utc>,
}

impl StoredEvent {
    pub fn new(incident_id: Uuid, sequence: u64, payload: IncidentEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            incident_id,
            sequence,
            event_type: payload.event_type().to_string(),
            payload,
            timestamp,
        }
    }
}

impl Incident {
    /// Builds the initial snapshot from the first event of a history.
    fn genesis(event: &StoredEvent) -> Result<Self, WorkflowError> {
        let alert = match &event.payload {
            IncidentEvent::Received { alert } => alert.clone(),
            other => {
                return Err(WorkflowError::CorruptHistory {
                    incident_id: event.incident_id,
                    reason: format!("history starts with {}", other.event_type()),
                })
            }
        };
        if event.sequence != 1 {
            return Err(WorkflowError::CorruptHistory {
                incident_id: event.incident_id,
                reason: format!("history starts at sequence {}", event.sequence),
            });
        }

        Ok(Incident {
            incident_id: event.incident_id,
            alert,
            enrichments: BTreeMap::new(),
            degraded_indicators: Vec::new(),
            verdict: None,
            approval: None,
            remediation: None,
            pending_action: None,
            state: IncidentState::Received,
            failure_reason: None,
            cancel_requested: None,
            duplicate_deliveries: 0,
            version: 1,
            created_at: event.timestamp,
            updated_at: event.timestamp,
            history: vec![event.clone()],
        })
    }

    /// Checks that `event` may be applied, without changing anything.
    pub fn validate(&self, event: &IncidentEvent) -> Result<(), WorkflowError> {
        if self.state.is_terminal() {
            return Err(WorkflowError::AlreadyClosed(self.incident_id));
        }

        let unexpected = || WorkflowError::UnexpectedEvent {
            event: event.event_type(),
            state: self.state,
        };

        match event {
            IncidentEvent::Received { .. } => return Err(unexpected()),
            IncidentEvent::ApprovalResolved { request } => {
                let pending = self.approval.as_ref().filter(|a| a.is_pending());
                match pending {
                    Some(a) if a.request_id == request.request_id && request.status.is_terminal() => {}
                    _ => return Err(unexpected()),
                }
            }
            IncidentEvent::RemediationAttempted { action_id, .. } => {
                let current = self.pending_action.as_ref().map(|p| p.action_id.as_str());
                if self.state != IncidentState::Remediating || current != Some(action_id.as_str()) {
                    return Err(unexpected());
                }
            }
            IncidentEvent::RemediationCompleted { record } => {
                let current = self.pending_action.as_ref().map(|p| p.action_id.as_str());
                if current != Some(record.action_id.as_str()) {
                    return Err(unexpected());
                }
            }
            IncidentEvent::RemediationStarted { .. } => {
                if self.pending_action.is_some() || self.remediation.is_some() {
                    return Err(unexpected());
                }
                // Remediation of an approval-gated verdict only starts after
                // the approval moved the incident into REMEDIATING.
                let gated = self.verdict.as_ref().map_or(true, |v| v.requires_approval);
                if self.state == IncidentState::Classified && gated {
                    return Err(unexpected());
                }
                if !matches!(self.state, IncidentState::Classified | IncidentState::Remediating) {
                    return Err(unexpected());
                }
            }
            _ => {}
        }

        if let Some(to) = event.target_state(self.state) {
            check_transition(self.state, to)?;
        }
        Ok(())
    }

    /// Folds one stored event into the snapshot.
    pub fn apply(&mut self, stored: &StoredEvent) -> Result<(), WorkflowError> {
        if stored.incident_id != self.incident_id || stored.sequence != self.version + 1 {
            return Err(WorkflowError::CorruptHistory {
                incident_id: self.incident_id,
                reason: format!(
                    "expected sequence {}, got {} for incident {}",
                    self.version + 1,
                    stored.sequence,
                    stored.incident_id
                ),
            });
        }
        self.validate(&stored.payload)?;

        let next_state = stored.payload.target_state(self.state);
        match &stored.payload {
            IncidentEvent::Received { .. } | IncidentEvent::Closed => {}
            IncidentEvent::DuplicateReceived { .. } => {
                self.duplicate_deliveries += 1;
            }
            IncidentEvent::EnrichmentStarted { .. } => {}
            IncidentEvent::Classified {
                enrichments,
                degraded,
                verdict,
            } => {
                self.enrichments = enrichments
                    .iter()
                    .map(|e| (e.indicator.clone(), e.clone()))
                    .collect();
                self.degraded_indicators = degraded.clone();
                self.verdict = Some(verdict.clone());
            }
            IncidentEvent::ApprovalRequested { request }
            | IncidentEvent::ApprovalResolved { request } => {
                self.approval = Some(request.clone());
            }
            IncidentEvent::RemediationStarted {
                action_id,
                kind,
                target,
                claimed_by,
            } => {
                self.pending_action = Some(PendingAction {
                    action_id: action_id.clone(),
                    kind: *kind,
                    target: target.clone(),
                    attempts: 0,
                    claimed_by: claimed_by.clone(),
                });
            }
            IncidentEvent::RemediationAttempted { attempt, .. } => {
                if let Some(pending) = self.pending_action.as_mut() {
                    pending.attempts = pending.attempts.max(*attempt);
                }
            }
            IncidentEvent::RemediationCompleted { record } => {
                self.pending_action = None;
                if record.outcome != RemediationOutcome::Success {
                    self.failure_reason = Some(
                        record
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("remediation {}", record.outcome)),
                    );
                }
                self.remediation = Some(record.clone());
            }
            IncidentEvent::CancelRequested { reason, .. } => {
                self.cancel_requested = Some(reason.clone());
            }
            IncidentEvent::Failed { reason, record } => {
                self.pending_action = None;
                self.failure_reason = Some(reason.clone());
                if record.is_some() {
                    self.remediation = record.clone();
                }
            }
        }

        if let Some(to) = next_state {
            self.state = to;
        }
        self.version = stored.sequence;
        self.updated_at = stored.timestamp;
        self.history.push(stored.clone());
        Ok(())
    }

    /// Rebuilds a snapshot from a full history.
    pub fn replay(events: &[StoredEvent]) -> Result<Incident, WorkflowError> {
        let (first, rest) = events
            .split_first()
            .ok_or_else(|| WorkflowError::CorruptHistory {
                incident_id: Uuid::nil(),
                reason: "empty history".to_string(),
            })?;

        let mut incident = Incident::genesis(first)?;
        for event in rest {
            incident.apply(event)?;
        }
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_alert, verdict};
    use crate::incident::Severity;

    fn stored(id: Uuid, seq: u64, payload: IncidentEvent) -> StoredEvent {
        StoredEvent::new(id, seq, payload, Utc::now())
    }

    fn classified(severity: Severity) -> IncidentEvent {
        IncidentEvent::Classified {
            enrichments: vec![],
            degraded: vec![],
            verdict: verdict(severity),
        }
    }

    #[test]
    fn test_replay_happy_path() {
        let id = Uuid::new_v4();
        let alert = sample_alert("A-1");
        let history = vec![
            stored(id, 1, IncidentEvent::Received { alert: alert.clone() }),
            stored(id, 2, IncidentEvent::EnrichmentStarted { indicators: alert.indicators() }),
            stored(id, 3, classified(Severity::Low)),
            stored(
                id,
                4,
                IncidentEvent::RemediationStarted {
                    action_id: "act".to_string(),
                    kind: ActionKind::Quarantine,
                    target: "192.168.1.100".to_string(),
                    claimed_by: None,
                },
            ),
        ];

        let incident = Incident::replay(&history).unwrap();
        assert_eq!(incident.state, IncidentState::Remediating);
        assert_eq!(incident.version, 4);
        assert_eq!(incident.history.len(), 4);
        assert_eq!(incident.pending_action.as_ref().unwrap().action_id, "act");
    }

    #[test]
    fn test_replay_rejects_gap() {
        let id = Uuid::new_v4();
        let history = vec![
            stored(id, 1, IncidentEvent::Received { alert: sample_alert("A-1") }),
            stored(id, 3, IncidentEvent::EnrichmentStarted { indicators: vec![] }),
        ];
        assert!(matches!(
            Incident::replay(&history),
            Err(WorkflowError::CorruptHistory { .. })
        ));
    }

    #[test]
    fn test_replay_rejects_illegal_jump() {
        let id = Uuid::new_v4();
        let history = vec![
            stored(id, 1, IncidentEvent::Received { alert: sample_alert("A-1") }),
            stored(id, 2, classified(Severity::Low)),
        ];
        assert!(matches!(
            Incident::replay(&history),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_replay_requires_received_first() {
        let id = Uuid::new_v4();
        let history = vec![stored(id, 1, IncidentEvent::Closed)];
        assert!(Incident::replay(&history).is_err());
        assert!(Incident::replay(&[]).is_err());
    }

    #[test]
    fn test_data_events_keep_state() {
        let id = Uuid::new_v4();
        let mut incident = Incident::replay(&[stored(
            id,
            1,
            IncidentEvent::Received { alert: sample_alert("A-1") },
        )])
        .unwrap();

        incident
            .apply(&stored(
                id,
                2,
                IncidentEvent::DuplicateReceived { delivered_at: Utc::now() },
            ))
            .unwrap();
        incident
            .apply(&stored(
                id,
                3,
                IncidentEvent::CancelRequested {
                    reason: "operator abort".to_string(),
                    requested_by: None,
                },
            ))
            .unwrap();

        assert_eq!(incident.state, IncidentState::Received);
        assert_eq!(incident.duplicate_deliveries, 1);
        assert_eq!(incident.cancel_requested.as_deref(), Some("operator abort"));
    }

    #[test]
    fn test_closed_incident_rejects_events() {
        let id = Uuid::new_v4();
        let alert = sample_alert("A-1");
        let history = vec![
            stored(id, 1, IncidentEvent::Received { alert }),
            stored(id, 2, IncidentEvent::EnrichmentStarted { indicators: vec![] }),
            stored(id, 3, classified(Severity::Low)),
            stored(
                id,
                4,
                IncidentEvent::Failed {
                    reason: "no actionable target".to_string(),
                    record: None,
                },
            ),
            stored(id, 5, IncidentEvent::Closed),
        ];
        let incident = Incident::replay(&history).unwrap();
        assert!(incident.is_closed());
        assert_eq!(incident.failure_reason.as_deref(), Some("no actionable target"));
        assert!(matches!(
            incident.validate(&IncidentEvent::Closed),
            Err(WorkflowError::AlreadyClosed(_))
        ));
    }

    #[test]
    fn test_gated_verdict_cannot_start_remediation() {
        let id = Uuid::new_v4();
        let history = vec![
            stored(id, 1, IncidentEvent::Received { alert: sample_alert("A-1") }),
            stored(id, 2, IncidentEvent::EnrichmentStarted { indicators: vec![] }),
            stored(id, 3, classified(Severity::High)),
        ];
        let incident = Incident::replay(&history).unwrap();
        let start = IncidentEvent::RemediationStarted {
            action_id: "act".to_string(),
            kind: ActionKind::Quarantine,
            target: "10.0.0.50".to_string(),
            claimed_by: None,
        };
        assert!(matches!(
            incident.validate(&start),
            Err(WorkflowError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(IncidentEvent::Failed {
            reason: "x".to_string(),
            record: None,
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["data"]["reason"], "x");
    }
}

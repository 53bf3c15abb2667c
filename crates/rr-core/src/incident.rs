//! Incident data models for Runbook Responder.
//!
//! This module defines the alert that starts a workflow, the records the
//! workflow produces along the way (enrichment, verdict, approval,
//! remediation), and the [`Incident`] aggregate that holds them.

use crate::events::StoredEvent;
use chrono::{DateTime, Utc};
use rr_connectors::{ActionKind, EnrichmentResult, IndicatorKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// A single indicator of compromise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    /// The indicator value (IP address, domain name or file hash).
    pub value: String,
    /// What kind of indicator this is.
    pub kind: IndicatorKind,
}

impl Indicator {
    pub fn new(value: impl Into<String>, kind: IndicatorKind) -> Self {
        Self {
            value: value.into().trim().to_lowercase(),
            kind,
        }
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self::new(value, IndicatorKind::Ip)
    }

    pub fn domain(value: impl Into<String>) -> Self {
        Self::new(value, IndicatorKind::Domain)
    }

    pub fn hash(value: impl Into<String>) -> Self {
        Self::new(value, IndicatorKind::Hash)
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// An inbound security finding. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Source-assigned identifier; the deduplication key.
    pub alert_id: String,
    /// Alert type as reported by the source (e.g. "MALWARE_DETECTED").
    #[serde(rename = "type")]
    pub alert_type: String,
    /// The primary indicator the alert is about.
    pub source_indicator: Indicator,
    /// When the source observed the activity.
    pub observed_at: DateTime<Utc>,
    /// Additional indicators carried by the alert.
    #[serde(default)]
    pub raw_indicators: Vec<Indicator>,
    /// Affected endpoint, when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Alert {
    /// Every distinct indicator in the alert, source indicator first.
    pub fn indicators(&self) -> Vec<Indicator> {
        let mut seen = BTreeSet::new();
        std::iter::once(&self.source_indicator)
            .chain(self.raw_indicators.iter())
            .filter(|i| seen.insert((i.kind, i.value.clone())))
            .cloned()
            .collect()
    }
}

/// Severity tier, totally ordered from `Low` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Output of the severity classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityVerdict {
    pub severity: Severity,
    pub score: f64,
    /// True iff severity is `High` or `Critical`.
    pub requires_approval: bool,
    /// Human-readable breakdown of the score. Advisory only.
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A decision posted by a human approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    #[serde(alias = "Approved", alias = "APPROVED")]
    Approved,
    #[serde(alias = "Denied", alias = "DENIED")]
    Denied,
}

impl From<ApprovalDecision> for ApprovalStatus {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Denied => ApprovalStatus::Denied,
        }
    }
}

/// Human sign-off request for one remediation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub incident_id: Uuid,
    /// What the remediation will act on.
    pub target: String,
    pub severity: Severity,
    pub justification: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    /// Deadline after which the request expires (fail-closed).
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalRequest {
    /// A pending request expiring `timeout` after now.
    pub fn pending(
        incident_id: Uuid,
        target: impl Into<String>,
        severity: Severity,
        justification: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::weeks(52));
        Self {
            request_id: Uuid::new_v4(),
            incident_id,
            target: target.into(),
            severity,
            justification: justification.into(),
            status: ApprovalStatus::Pending,
            created_at,
            expires_at: created_at + ttl,
            decided_at: None,
            decided_by: None,
            comment: None,
        }
    }

    /// Moves the request to a terminal status.
    pub fn decide(
        &mut self,
        status: ApprovalStatus,
        decided_by: Option<String>,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.decided_at = Some(at);
        self.decided_by = decided_by;
        self.comment = comment;
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// True when still pending past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.expires_at
    }
}

/// Outcome of one remediation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOutcome {
    Success,
    Failed,
    PartiallyApplied,
}

impl fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemediationOutcome::Success => "success",
            RemediationOutcome::Failed => "failed",
            RemediationOutcome::PartiallyApplied => "partially_applied",
        };
        f.write_str(s)
    }
}

/// The recorded result of executing one remediation action.
///
/// Created once per distinct `action_id`; later calls with the same key get
/// this record back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationRecord {
    /// Idempotency key, stable across retries of the same logical action.
    pub action_id: String,
    pub kind: ActionKind,
    pub target: String,
    pub outcome: RemediationOutcome,
    /// Ordered sub-step descriptions reported by the backend.
    pub evidence: Vec<String>,
    pub external_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    /// Number of backend calls made.
    pub attempts: u32,
    /// Failure reason, preserved verbatim from the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// States of the incident workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    Received,
    Enriching,
    Classified,
    AwaitingApproval,
    Remediating,
    Remediated,
    Denied,
    Failed,
    Closed,
}

impl IncidentState {
    /// `Closed` is the only terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentState::Closed)
    }

    /// States that end the workflow and only wait to be closed.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            IncidentState::Remediated | IncidentState::Denied | IncidentState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Received => "RECEIVED",
            IncidentState::Enriching => "ENRICHING",
            IncidentState::Classified => "CLASSIFIED",
            IncidentState::AwaitingApproval => "AWAITING_APPROVAL",
            IncidentState::Remediating => "REMEDIATING",
            IncidentState::Remediated => "REMEDIATED",
            IncidentState::Denied => "DENIED",
            IncidentState::Failed => "FAILED",
            IncidentState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IncidentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            IncidentState::Received,
            IncidentState::Enriching,
            IncidentState::Classified,
            IncidentState::AwaitingApproval,
            IncidentState::Remediating,
            IncidentState::Remediated,
            IncidentState::Denied,
            IncidentState::Failed,
            IncidentState::Closed,
        ];
        let wanted = s.trim().to_ascii_uppercase();
        all.into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| format!("unknown incident state: {}", s))
    }
}

/// The aggregate root for one alert's response workflow.
///
/// Never mutated directly: every change is an event appended to the state
/// store and then folded in with [`Incident::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub incident_id: Uuid,
    pub alert: Alert,
    /// Enrichment per indicator value.
    pub enrichments: BTreeMap<String, EnrichmentResult>,
    /// Indicators whose lookup failed or timed out and were scored as unknown.
    #[serde(default)]
    pub degraded_indicators: Vec<Indicator>,
    pub verdict: Option<SeverityVerdict>,
    pub approval: Option<ApprovalRequest>,
    pub remediation: Option<RemediationRecord>,
    /// The remediation action in flight, if one has been started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    pub state: IncidentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<String>,
    /// Number of times the same alert was delivered again.
    #[serde(default)]
    pub duplicate_deliveries: u32,
    /// Sequence number of the last applied event.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Every event applied so far, in order.
    pub history: Vec<StoredEvent>,
}

/// A remediation action that has been started but has no record yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub action_id: String,
    pub kind: ActionKind,
    pub target: String,
    /// Highest backend attempt recorded so far.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

impl Incident {
    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn summary(&self) -> IncidentSummary {
        IncidentSummary {
            incident_id: self.incident_id,
            alert_id: self.alert.alert_id.clone(),
            alert_type: self.alert.alert_type.clone(),
            state: self.state,
            severity: self.verdict.as_ref().map(|v| v.severity),
            score: self.verdict.as_ref().map(|v| v.score),
            remediation_outcome: self.remediation.as_ref().map(|r| r.outcome),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Compact view used for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub incident_id: Uuid,
    pub alert_id: String,
    pub alert_type: String,
    pub state: IncidentState,
    pub severity: Option<Severity>,
    pub score: Option<f64>,
    pub remediation_outcome: Option<RemediationOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert {
            alert_id: "SEC-2025-001".to_string(),
            alert_type: "MALWARE_DETECTED".to_string(),
            source_indicator: Indicator::ip("192.168.1.100"),
            observed_at: Utc::now(),
            raw_indicators: vec![
                Indicator::hash("d41d8cd98f00b204e9800998ecf8427e"),
                Indicator::domain("malicious-site.com"),
                Indicator::ip("192.168.1.100"),
            ],
            host: None,
        }
    }

    #[test]
    fn test_indicators_are_distinct_and_source_first() {
        let indicators = alert().indicators();
        assert_eq!(indicators.len(), 3);
        assert_eq!(indicators[0], Indicator::ip("192.168.1.100"));
    }

    #[test]
    fn test_indicator_normalization() {
        let i = Indicator::domain("  Malicious-Site.COM ");
        assert_eq!(i.value, "malicious-site.com");
        assert_eq!(i.to_string(), "domain:malicious-site.com");
    }

    #[test]
    fn test_severity_ordering_and_wire_format() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"HIGH\"");
    }

    #[test]
    fn test_alert_wire_format() {
        let json = serde_json::to_value(alert()).unwrap();
        assert_eq!(json["alertId"], "SEC-2025-001");
        assert_eq!(json["type"], "MALWARE_DETECTED");
        assert_eq!(json["sourceIndicator"]["kind"], "ip");
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(
            "awaiting_approval".parse::<IncidentState>(),
            Ok(IncidentState::AwaitingApproval)
        );
        assert!("bogus".parse::<IncidentState>().is_err());
        assert!(IncidentState::Denied.is_outcome());
        assert!(IncidentState::Closed.is_terminal());
    }

    #[test]
    fn test_decision_accepts_capitalized() {
        let d: ApprovalDecision = serde_json::from_str("\"Approved\"").unwrap();
        assert_eq!(d, ApprovalDecision::Approved);
        assert_eq!(ApprovalStatus::from(ApprovalDecision::Denied), ApprovalStatus::Denied);
    }
}

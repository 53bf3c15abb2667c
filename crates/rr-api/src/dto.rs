//! Data Transfer Objects (DTOs) for API requests and responses.

use chrono::{DateTime, Utc};
use rr_connectors::ConnectorHealth;
use rr_core::{ApprovalDecision, ComponentStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Alert ingestion DTOs
// ============================================================================

/// One indicator in the canonical alert shape.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct IndicatorPayload {
    #[validate(length(min = 1, max = 512))]
    pub value: String,
    /// `ip`, `domain` or `hash`.
    #[validate(length(min = 1, max = 16))]
    pub kind: String,
}

/// Canonical alert shape.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[validate(length(min = 1, max = 256))]
    pub alert_id: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 128))]
    pub alert_type: String,
    #[validate(nested)]
    pub source_indicator: IndicatorPayload,
    #[serde(alias = "timestamp")]
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    #[validate(length(max = 64), nested)]
    pub raw_indicators: Vec<IndicatorPayload>,
    #[validate(length(min = 1, max = 256))]
    pub host: Option<String>,
}

/// Alert shape emitted by the earlier runbook agent.
///
/// `indicators` maps a key such as `file_hash` or `domain` to one value or a
/// list of values.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LegacyAlertPayload {
    #[validate(length(min = 1, max = 256))]
    pub alert_id: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 128))]
    pub alert_type: String,
    #[validate(length(min = 1, max = 512))]
    pub source_ip: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub indicators: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[validate(length(min = 1, max = 256))]
    pub host: Option<String>,
}

/// Response to an alert delivery.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub accepted: bool,
    pub incident_id: Uuid,
    /// True when the alert id was already known.
    pub duplicate: bool,
}

// ============================================================================
// Incident DTOs
// ============================================================================

/// Query parameters for listing incidents.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListIncidentsQuery {
    /// Only incidents in this state, e.g. `AWAITING_APPROVAL`.
    pub state: Option<String>,
}

/// Optional body for an operator abort.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub requested_by: Option<String>,
}

// ============================================================================
// Approval DTOs
// ============================================================================

/// A human decision on a pending approval request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecisionRequest {
    /// `approved` or `denied`.
    #[schema(value_type = String, example = "approved")]
    pub decision: ApprovalDecision,
    #[validate(length(min = 1, max = 256))]
    pub decided_by: Option<String>,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

// ============================================================================
// Health DTOs
// ============================================================================

/// `healthy` when every component is, `degraded` otherwise.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Health of one connector.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub name: String,
    /// `threat_intel` or `remediation`.
    pub component_type: String,
    /// `healthy`, `degraded` or `unhealthy`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<ComponentStatus> for ComponentHealth {
    fn from(component: ComponentStatus) -> Self {
        let (status, detail) = match component.health {
            ConnectorHealth::Healthy => ("healthy", None),
            ConnectorHealth::Degraded(reason) => ("degraded", Some(reason)),
            ConnectorHealth::Unhealthy(reason) => ("unhealthy", Some(reason)),
        };
        Self {
            name: component.name,
            component_type: component.component_type,
            status: status.to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_payload_accepts_timestamp_alias() {
        let payload: AlertPayload = serde_json::from_value(json!({
            "alertId": "SEC-1",
            "type": "MALWARE_DETECTED",
            "sourceIndicator": {"value": "10.0.0.50", "kind": "ip"},
            "timestamp": "2025-10-18T12:00:00Z"
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
        assert!(payload.raw_indicators.is_empty());
        assert_eq!(payload.observed_at.to_rfc3339(), "2025-10-18T12:00:00+00:00");
    }

    #[test]
    fn test_empty_alert_id_fails_validation() {
        let payload: AlertPayload = serde_json::from_value(json!({
            "alertId": "",
            "type": "MALWARE_DETECTED",
            "sourceIndicator": {"value": "10.0.0.50", "kind": "ip"},
            "observedAt": "2025-10-18T12:00:00Z"
        }))
        .unwrap();
        let errors = payload.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 1);
    }

    #[test]
    fn test_decision_request_accepts_either_case() {
        let lower: ApprovalDecisionRequest =
            serde_json::from_value(json!({"decision": "approved"})).unwrap();
        assert_eq!(lower.decision, ApprovalDecision::Approved);

        let title: ApprovalDecisionRequest =
            serde_json::from_value(json!({"decision": "Denied", "decidedBy": "alice"})).unwrap();
        assert_eq!(title.decision, ApprovalDecision::Denied);
        assert_eq!(title.decided_by.as_deref(), Some("alice"));
    }
}

//! Remediation planning: which action to take for an incident.

use crate::incident::{Incident, PendingAction};
use crate::traits::RemediationAction;
use rr_connectors::{ActionKind, IndicatorKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable idempotency key for one logical action on one incident.
pub fn action_id(incident_id: Uuid, kind: ActionKind, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(incident_id.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives the action from the alert's source indicator.
///
/// Returns `None` when the alert names nothing the backends can act on.
pub fn plan_remediation(incident: &Incident) -> Option<RemediationAction> {
    let alert = &incident.alert;
    let source = &alert.source_indicator;

    let (kind, target) = match source.kind {
        IndicatorKind::Ip => (ActionKind::Quarantine, source.value.clone()),
        IndicatorKind::Domain => (ActionKind::BlockDomain, source.value.clone()),
        IndicatorKind::Hash => match alert.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => (ActionKind::Isolate, host.to_string()),
            _ => {
                let ip = alert
                    .indicators()
                    .into_iter()
                    .find(|i| i.kind == IndicatorKind::Ip)?;
                (ActionKind::Quarantine, ip.value)
            }
        },
    };

    if target.is_empty() {
        return None;
    }

    Some(action_for(&PendingAction {
        action_id: action_id(incident.incident_id, kind, &target),
        kind,
        target,
        attempts: 0,
        claimed_by: None,
    }))
}

/// Rebuilds the action for a remediation already started on an incident.
pub fn action_for(pending: &PendingAction) -> RemediationAction {
    let mut params = HashMap::new();
    params.insert(pending.kind.target_param().to_string(), pending.target.clone());
    RemediationAction {
        action_id: pending.action_id.clone(),
        kind: pending.kind,
        target: pending.target.clone(),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{IncidentEvent, StoredEvent};
    use crate::fixtures::sample_alert;
    use crate::incident::{Alert, Indicator};
    use chrono::Utc;

    fn incident(alert: Alert) -> Incident {
        let stored = StoredEvent::new(Uuid::new_v4(), 1, IncidentEvent::Received { alert }, Utc::now());
        Incident::replay(&[stored]).unwrap()
    }

    #[test]
    fn test_ip_source_is_quarantined() {
        let incident = incident(sample_alert("A-1"));
        let action = plan_remediation(&incident).unwrap();
        assert_eq!(action.kind, ActionKind::Quarantine);
        assert_eq!(action.target, "192.168.1.100");
        assert_eq!(action.params.get("target_ip").map(String::as_str), Some("192.168.1.100"));
    }

    #[test]
    fn test_domain_source_is_blocked() {
        let mut alert = sample_alert("A-1");
        alert.source_indicator = Indicator::domain("malicious-site.com");
        let action = plan_remediation(&incident(alert)).unwrap();
        assert_eq!(action.kind, ActionKind::BlockDomain);
        assert_eq!(action.params.get("domain").map(String::as_str), Some("malicious-site.com"));
    }

    #[test]
    fn test_hash_source_isolates_host() {
        let mut alert = sample_alert("A-1");
        alert.source_indicator = Indicator::hash("d41d8cd98f00b204e9800998ecf8427e");
        alert.host = Some("ws-042".to_string());
        let action = plan_remediation(&incident(alert)).unwrap();
        assert_eq!(action.kind, ActionKind::Isolate);
        assert_eq!(action.target, "ws-042");
    }

    #[test]
    fn test_hash_source_without_host_falls_back_to_ip() {
        let mut alert = sample_alert("A-1");
        alert.source_indicator = Indicator::hash("d41d8cd98f00b204e9800998ecf8427e");
        alert.raw_indicators = vec![Indicator::ip("10.0.0.50")];
        let action = plan_remediation(&incident(alert)).unwrap();
        assert_eq!(action.kind, ActionKind::Quarantine);
        assert_eq!(action.target, "10.0.0.50");
    }

    #[test]
    fn test_no_actionable_target() {
        let mut alert = sample_alert("A-1");
        alert.source_indicator = Indicator::hash("d41d8cd98f00b204e9800998ecf8427e");
        alert.raw_indicators = vec![Indicator::domain("example.org")];
        assert!(plan_remediation(&incident(alert)).is_none());
    }

    #[test]
    fn test_action_id_is_stable() {
        let id = Uuid::new_v4();
        let a = action_id(id, ActionKind::Quarantine, "10.0.0.50");
        assert_eq!(a, action_id(id, ActionKind::Quarantine, "10.0.0.50"));
        assert_ne!(a, action_id(id, ActionKind::Isolate, "10.0.0.50"));
        assert_ne!(a, action_id(Uuid::new_v4(), ActionKind::Quarantine, "10.0.0.50"));
        assert_eq!(a.len(), 64);
    }
}

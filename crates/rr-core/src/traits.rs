//! Service seams between the workflow engine and its collaborators.
//!
//! The engine only knows these traits. `rr-policy` provides the approval
//! gateway and `rr-actions` the remediation executor; tests plug in their
//! own implementations.

use crate::db::StoreError;
use crate::incident::{ApprovalDecision, ApprovalRequest, ApprovalStatus, RemediationRecord, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_connectors::{ActionKind, Connector, ConnectorHealth};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by an approval service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("Approval request not found: {0}")]
    NotFound(Uuid),

    #[error("Approval request {request_id} already {status}")]
    AlreadyDecided {
        request_id: Uuid,
        status: ApprovalStatus,
    },

    #[error("Approval request {0} has expired")]
    Expired(Uuid),

    #[error("Invalid approval request: {0}")]
    Invalid(String),
}

/// Errors raised by a remediation service.
///
/// Backend failures are not errors here: they end up in the returned
/// [`RemediationRecord`]. These are failures to run or record the action.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemediationError {
    #[error("Action {action_id} is not pending on incident {incident_id}")]
    NotPending { incident_id: Uuid, action_id: String },

    #[error("Failed to record remediation: {0}")]
    Audit(String),

    /// The backend ran but the completion could not be appended. Carries
    /// the result so its evidence is not lost.
    #[error("Remediation {} ran but was not recorded: {reason}", .record.action_id)]
    Unrecorded {
        record: Box<RemediationRecord>,
        reason: String,
    },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

/// Human approval rendezvous.
///
/// Building a request has no side effects; `submit` registers it and
/// notifies the human channel. The engine commits the request to the
/// incident log between the two, so a decision can never arrive for a
/// request the log does not know about.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// Builds a pending request expiring `timeout` from now.
    fn build_request(
        &self,
        incident_id: Uuid,
        target: &str,
        severity: Severity,
        justification: &str,
        timeout: Duration,
    ) -> ApprovalRequest;

    /// Registers a pending request and notifies approvers.
    ///
    /// A failed notification is logged and does not fail the call; the
    /// request still expires fail-closed.
    async fn submit(&self, request: &ApprovalRequest) -> Result<(), ApprovalError>;

    /// Re-registers a pending request read back from the log, without
    /// notifying again.
    async fn restore(&self, request: &ApprovalRequest);

    /// Moves a pending request to a terminal status.
    async fn resolve(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError>;

    /// Expires every pending request whose deadline is at or before `now`.
    async fn expire_due(&self, now: DateTime<Utc>) -> Vec<ApprovalRequest>;

    async fn get(&self, request_id: Uuid) -> Option<ApprovalRequest>;

    async fn list_pending(&self) -> Vec<ApprovalRequest>;
}

/// A remediation action planned for an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    /// Idempotency key.
    pub action_id: String,
    pub kind: ActionKind,
    pub target: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Health of one external dependency, as reported by its connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: String,
    pub component_type: String,
    pub health: ConnectorHealth,
}

impl ComponentStatus {
    /// Asks the connector for its health. A failed check counts as unhealthy.
    pub async fn of<C: Connector + ?Sized>(connector: &C) -> Self {
        let health = match connector.health_check().await {
            Ok(health) => health,
            Err(e) => ConnectorHealth::Unhealthy(e.to_string()),
        };
        Self {
            name: connector.name().to_string(),
            component_type: connector.connector_type().to_string(),
            health,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == ConnectorHealth::Healthy
    }
}

/// Executes remediation actions exactly once per action id.
#[async_trait]
pub trait RemediationService: Send + Sync {
    /// Runs `action` for the incident, or returns the record of an earlier
    /// run with the same action id.
    ///
    /// The implementation appends every backend attempt and the final record
    /// to the incident log.
    async fn execute(
        &self,
        incident_id: Uuid,
        action: &RemediationAction,
    ) -> Result<RemediationRecord, RemediationError>;

    /// Health of the backend that applies actions.
    async fn health(&self) -> ComponentStatus {
        ComponentStatus {
            name: "in-process".to_string(),
            component_type: "remediation".to_string(),
            health: ConnectorHealth::Healthy,
        }
    }
}

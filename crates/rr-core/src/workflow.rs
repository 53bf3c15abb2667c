//! Workflow state machine for Runbook Responder.
//!
//! The legal state changes of an incident are listed in a single transition
//! table. Both the engine (before it commits an event) and the event fold
//! (when it replays history) check against this table, so a history that
//! contains an illegal jump cannot be produced or replayed.
//!
//! ```text
//! RECEIVED -> ENRICHING -> CLASSIFIED -> AWAITING_APPROVAL -> REMEDIATING -> REMEDIATED -> CLOSED
//!                                   \-> REMEDIATING      \-> DENIED     \-> FAILED   -> CLOSED
//! ```

use crate::db::StoreError;
use crate::incident::IncidentState;
use crate::traits::{ApprovalError, RemediationError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in workflow processing.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: IncidentState,
        to: IncidentState,
    },

    #[error("Event {event} is not valid in state {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: IncidentState,
    },

    #[error("Incident not found: {0}")]
    IncidentNotFound(Uuid),

    #[error("Corrupt history for incident {incident_id}: {reason}")]
    CorruptHistory { incident_id: Uuid, reason: String },

    #[error("Incident {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("Gave up after {attempts} version conflicts on incident {incident_id}")]
    ConflictRetriesExhausted { incident_id: Uuid, attempts: u32 },

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Remediation error: {0}")]
    Remediation(#[from] RemediationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkflowTransition {
    pub from: IncidentState,
    pub to: IncidentState,
    /// What causes this transition.
    pub trigger: &'static str,
}

const fn t(from: IncidentState, to: IncidentState, trigger: &'static str) -> WorkflowTransition {
    WorkflowTransition { from, to, trigger }
}

use IncidentState::*;

/// The transition table.
pub const TRANSITIONS: &[WorkflowTransition] = &[
    t(Received, Enriching, "alert ingested"),
    t(Enriching, Classified, "all enrichments resolved or timed out"),
    t(Classified, AwaitingApproval, "verdict requires approval"),
    t(Classified, Remediating, "verdict does not require approval"),
    t(Classified, Failed, "cancelled by operator or no actionable target"),
    t(AwaitingApproval, Remediating, "approval granted"),
    t(AwaitingApproval, Denied, "approval denied or expired"),
    t(Remediating, Remediated, "remediation succeeded"),
    t(Remediating, Failed, "remediation failed or retries exhausted"),
    t(Remediated, Closed, "audit record written"),
    t(Denied, Closed, "audit record written"),
    t(Failed, Closed, "audit record written"),
];

/// Looks up a transition in the table.
pub fn find_transition(from: IncidentState, to: IncidentState) -> Option<&'static WorkflowTransition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

pub fn can_transition(from: IncidentState, to: IncidentState) -> bool {
    find_transition(from, to).is_some()
}

/// Validates a transition, returning the matching table row.
pub fn check_transition(
    from: IncidentState,
    to: IncidentState,
) -> Result<&'static WorkflowTransition, WorkflowError> {
    find_transition(from, to).ok_or(WorkflowError::InvalidTransition { from, to })
}

/// States reachable from `from` in one step.
pub fn next_states(from: IncidentState) -> Vec<IncidentState> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            Received,
            Enriching,
            Classified,
            AwaitingApproval,
            Remediating,
            Remediated,
            Closed,
        ];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_approval_cannot_be_skipped_backwards() {
        assert!(!can_transition(AwaitingApproval, Classified));
        assert!(!can_transition(Denied, Remediating));
        assert!(!can_transition(AwaitingApproval, Remediated));
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(next_states(Closed).is_empty());
    }

    #[test]
    fn test_outcomes_only_close() {
        for state in [Remediated, Denied, Failed] {
            assert_eq!(next_states(state), vec![Closed]);
        }
    }

    #[test]
    fn test_check_transition_error() {
        let err = check_transition(Received, Remediating).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: Received,
                to: Remediating
            }
        ));
        assert_eq!(
            err.to_string(),
            "Invalid state transition from RECEIVED to REMEDIATING"
        );
    }
}

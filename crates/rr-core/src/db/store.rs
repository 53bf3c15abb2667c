//! The incident state store contract.

use super::StoreError;
use crate::events::{IncidentEvent, StoredEvent};
use crate::incident::{Incident, RemediationRecord};
use crate::workflow::WorkflowError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Durable, per-incident ordered event log.
///
/// Appends are atomic and totally ordered within one incident. Every append
/// names the version the writer last saw; if another writer got there first
/// the append fails with [`StoreError::VersionConflict`] and nothing is
/// written.
#[async_trait]
pub trait IncidentStateStore: Send + Sync {
    /// Appends `event` if the incident is at `expected_version`.
    ///
    /// A new incident is created by appending `IncidentEvent::Received` with
    /// `expected_version == 0`; this also binds the alert id and fails with
    /// [`StoreError::DuplicateAlert`] if the alert is already known. The
    /// returned event carries the assigned sequence number.
    async fn append(
        &self,
        incident_id: Uuid,
        expected_version: u64,
        event: IncidentEvent,
    ) -> Result<StoredEvent, StoreError>;

    /// All events of an incident in sequence order; empty if unknown.
    async fn read_history(&self, incident_id: Uuid) -> Result<Vec<StoredEvent>, StoreError>;

    /// The incident snapshot, rebuilt by replaying its history.
    async fn read_current(&self, incident_id: Uuid) -> Result<Incident, StoreError> {
        let history = self.read_history(incident_id).await?;
        if history.is_empty() {
            return Err(StoreError::NotFound(incident_id));
        }
        Incident::replay(&history).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// The incident bound to an alert id, if any.
    async fn find_incident_by_alert(&self, alert_id: &str) -> Result<Option<Uuid>, StoreError>;

    /// The recorded remediation for an action id, if any.
    async fn find_remediation(&self, action_id: &str)
        -> Result<Option<RemediationRecord>, StoreError>;

    /// Ids of all stored incidents, oldest first.
    async fn list_incident_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Deletes an incident's log and index entries. Returns false if unknown.
    async fn purge(&self, incident_id: Uuid) -> Result<bool, StoreError>;
}

/// Shared handle to a state store.
pub type SharedStateStore = Arc<dyn IncidentStateStore>;

/// Reads the incident, lets `decide` pick the next event against the fresh
/// snapshot, and appends it at that snapshot's version.
///
/// On a version conflict the whole cycle repeats, so a stale writer
/// re-evaluates against the winner's state instead of committing a second,
/// conflicting transition. `decide` returning `None` commits nothing.
pub async fn commit_with_retry<F>(
    store: &dyn IncidentStateStore,
    incident_id: Uuid,
    max_attempts: u32,
    mut decide: F,
) -> Result<(Incident, Option<StoredEvent>), WorkflowError>
where
    F: FnMut(&Incident) -> Result<Option<IncidentEvent>, WorkflowError> + Send,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let mut incident = match store.read_current(incident_id).await {
            Ok(incident) => incident,
            Err(StoreError::NotFound(id)) => return Err(WorkflowError::IncidentNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let event = match decide(&incident)? {
            Some(event) => event,
            None => return Ok((incident, None)),
        };
        incident.validate(&event)?;

        match store.append(incident_id, incident.version, event).await {
            Ok(stored) => {
                incident.apply(&stored)?;
                return Ok((incident, Some(stored)));
            }
            Err(StoreError::VersionConflict { expected, actual, .. }) => {
                metrics::counter!("rr_version_conflicts_total").increment(1);
                debug!(
                    incident_id = %incident_id,
                    attempt,
                    expected,
                    actual,
                    "Version conflict, re-reading incident"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(WorkflowError::ConflictRetriesExhausted {
        incident_id,
        attempts: max_attempts,
    })
}

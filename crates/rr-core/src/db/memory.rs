//! In-memory incident state store.

use super::{IncidentStateStore, StoreError};
use crate::events::{IncidentEvent, StoredEvent};
use crate::incident::RemediationRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    logs: HashMap<Uuid, Vec<StoredEvent>>,
    /// Creation order, for listing.
    order: Vec<Uuid>,
    alerts: HashMap<String, Uuid>,
    remediations: HashMap<String, RemediationRecord>,
}

/// State store backed by a `RwLock`ed map. Lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all incidents.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.logs.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl IncidentStateStore for InMemoryStateStore {
    async fn append(
        &self,
        incident_id: Uuid,
        expected_version: u64,
        event: IncidentEvent,
    ) -> Result<StoredEvent, StoreError> {
        let mut inner = self.inner.write().await;

        let actual = inner.logs.get(&incident_id).map_or(0, |log| log.len() as u64);
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                incident_id,
                expected: expected_version,
                actual,
            });
        }

        match &event {
            IncidentEvent::Received { alert } => {
                if actual != 0 {
                    return Err(StoreError::Rejected(
                        "received event must open the log".to_string(),
                    ));
                }
                if let Some(existing) = inner.alerts.get(&alert.alert_id) {
                    return Err(StoreError::DuplicateAlert {
                        alert_id: alert.alert_id.clone(),
                        incident_id: *existing,
                    });
                }
                inner.alerts.insert(alert.alert_id.clone(), incident_id);
                inner.order.push(incident_id);
            }
            _ if actual == 0 => return Err(StoreError::NotFound(incident_id)),
            other => {
                if let Some(record) = other.remediation_record() {
                    inner
                        .remediations
                        .entry(record.action_id.clone())
                        .or_insert_with(|| record.clone());
                }
            }
        }

        let stored = StoredEvent::new(incident_id, actual + 1, event, Utc::now());
        inner
            .logs
            .entry(incident_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn read_history(&self, incident_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.logs.get(&incident_id).cloned().unwrap_or_default())
    }

    async fn find_incident_by_alert(&self, alert_id: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.inner.read().await.alerts.get(alert_id).copied())
    }

    async fn find_remediation(
        &self,
        action_id: &str,
    ) -> Result<Option<RemediationRecord>, StoreError> {
        Ok(self.inner.read().await.remediations.get(action_id).cloned())
    }

    async fn list_incident_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn purge(&self, incident_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(log) = inner.logs.remove(&incident_id) else {
            return Ok(false);
        };
        inner.order.retain(|id| *id != incident_id);
        inner.alerts.retain(|_, id| *id != incident_id);
        for event in &log {
            if let Some(record) = event.payload.remediation_record() {
                inner.remediations.remove(&record.action_id);
            }
        }
        Ok(true)
    }
}

//! SQLite incident state store.
//!
//! The `(incident_id, sequence)` primary key of `incident_events` is what
//! makes append-if-expected-version atomic: two writers that read the same
//! version both try to insert the same sequence number and only one insert
//! can succeed.

use super::{IncidentStateStore, StoreError};
use crate::events::{IncidentEvent, StoredEvent};
use crate::incident::RemediationRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use uuid::Uuid;

/// State store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    sequence: i64,
    payload: String,
    recorded_at: String,
}

impl EventRow {
    fn into_stored(self, incident_id: Uuid) -> Result<StoredEvent, StoreError> {
        let payload: IncidentEvent = serde_json::from_str(&self.payload)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|e| StoreError::Serialization(e.to_string()))?
            .with_timezone(&Utc);
        Ok(StoredEvent::new(
            incident_id,
            self.sequence as u64,
            payload,
            timestamp,
        ))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("busy")
        }
        _ => false,
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl IncidentStateStore for SqliteStateStore {
    #[instrument(skip(self, event), fields(incident_id = %incident_id, event_type = event.event_type()))]
    async fn append(
        &self,
        incident_id: Uuid,
        expected_version: u64,
        event: IncidentEvent,
    ) -> Result<StoredEvent, StoreError> {
        let id = incident_id.to_string();
        let mut tx = self.pool.begin().await?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM incident_events WHERE incident_id = ?",
        )
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;
        let actual = actual as u64;

        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                incident_id,
                expected: expected_version,
                actual,
            });
        }

        let stored = StoredEvent::new(incident_id, actual + 1, event, Utc::now());
        let recorded_at = stored.timestamp.to_rfc3339();

        match &stored.payload {
            IncidentEvent::Received { alert } => {
                if actual != 0 {
                    return Err(StoreError::Rejected(
                        "received event must open the log".to_string(),
                    ));
                }
                let inserted = sqlx::query(
                    "INSERT INTO alert_index (alert_id, incident_id, created_at) VALUES (?, ?, ?)",
                )
                .bind(&alert.alert_id)
                .bind(&id)
                .bind(&recorded_at)
                .execute(&mut *tx)
                .await;

                if let Err(err) = inserted {
                    if !is_unique_violation(&err) {
                        return Err(err.into());
                    }
                    let existing: String =
                        sqlx::query_scalar("SELECT incident_id FROM alert_index WHERE alert_id = ?")
                            .bind(&alert.alert_id)
                            .fetch_one(&mut *tx)
                            .await?;
                    return Err(StoreError::DuplicateAlert {
                        alert_id: alert.alert_id.clone(),
                        incident_id: parse_uuid(&existing)?,
                    });
                }
            }
            _ if actual == 0 => return Err(StoreError::NotFound(incident_id)),
            other => {
                if let Some(record) = other.remediation_record() {
                    let record_json = serde_json::to_string(record)?;
                    sqlx::query(
                        "INSERT OR IGNORE INTO remediation_index (action_id, incident_id, record) VALUES (?, ?, ?)",
                    )
                    .bind(&record.action_id)
                    .bind(&id)
                    .bind(&record_json)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        let payload = serde_json::to_string(&stored.payload)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO incident_events (incident_id, sequence, event_type, payload, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(stored.sequence as i64)
        .bind(&stored.event_type)
        .bind(&payload)
        .bind(&recorded_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) || is_busy(&err) => {
                debug!(incident_id = %incident_id, "Concurrent append detected");
                return Err(StoreError::VersionConflict {
                    incident_id,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = tx.commit().await {
            if is_busy(&err) {
                return Err(StoreError::VersionConflict {
                    incident_id,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            return Err(err.into());
        }
        Ok(stored)
    }

    async fn read_history(&self, incident_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT sequence, payload, recorded_at
            FROM incident_events
            WHERE incident_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(incident_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_stored(incident_id))
            .collect()
    }

    async fn find_incident_by_alert(&self, alert_id: &str) -> Result<Option<Uuid>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT incident_id FROM alert_index WHERE alert_id = ?")
                .bind(alert_id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_deref().map(parse_uuid).transpose()
    }

    async fn find_remediation(
        &self,
        action_id: &str,
    ) -> Result<Option<RemediationRecord>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT record FROM remediation_index WHERE action_id = ?")
                .bind(action_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn list_incident_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT incident_id FROM alert_index ORDER BY rowid ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|r| parse_uuid(r)).collect()
    }

    async fn purge(&self, incident_id: Uuid) -> Result<bool, StoreError> {
        let id = incident_id.to_string();
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM incident_events WHERE incident_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM alert_index WHERE incident_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM remediation_index WHERE incident_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted > 0)
    }
}

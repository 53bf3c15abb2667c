//! State store error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the incident state store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Another writer committed first; re-read and retry.
    #[error("Version conflict on incident {incident_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        incident_id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// The alert id is already bound to an incident.
    #[error("Alert {alert_id} already belongs to incident {incident_id}")]
    DuplicateAlert { alert_id: String, incident_id: Uuid },

    #[error("Incident not found: {0}")]
    NotFound(Uuid),

    /// The stored history does not replay.
    #[error("Corrupt history: {0}")]
    Corrupt(String),

    /// The event is not valid against the current snapshot.
    #[error("Rejected event: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid database configuration: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Whether a retry after re-reading the incident can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    /// Whether the failure is likely to clear up on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::PoolExhausted | StoreError::Connection(_) => true,
            StoreError::Query(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("busy")
                    || msg.contains("database is locked")
                    || msg.contains("connection reset")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => StoreError::Query(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
            sqlx::Error::Configuration(msg) => StoreError::Configuration(msg.to_string()),
            sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

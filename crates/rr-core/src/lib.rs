//! # rr-core
//!
//! Incident model, event log and workflow engine for Runbook Responder.
//!
//! An incident is an append-only log of [`IncidentEvent`]s; its current
//! state is the fold of that log. The [`WorkflowEngine`] drives incidents
//! through enrichment, classification, approval and remediation, committing
//! every step to an [`IncidentStateStore`] with expected-version appends.

pub mod classifier;
pub mod db;
pub mod engine;
pub mod enrichment;
pub mod events;
pub mod fixtures;
pub mod incident;
pub mod plan;
pub mod retry;
pub mod traits;
pub mod workflow;

pub use classifier::{SeverityClassifier, SeverityScorer};
pub use db::{
    commit_with_retry, InMemoryStateStore, IncidentStateStore, SharedStateStore, StoreError,
};
#[cfg(feature = "database")]
pub use db::{create_pool, run_migrations, SqliteStateStore};
pub use engine::{
    EngineConfig, IngestOutcome, RecoveryReport, WorkflowEngine, CANCELLED_REASON,
    INTERRUPTED_REASON, NO_TARGET_REASON,
};
pub use enrichment::{Enricher, EnrichmentConfig, EnrichmentOutcome};
pub use events::{IncidentEvent, StoredEvent};
pub use incident::{
    Alert, ApprovalDecision, ApprovalRequest, ApprovalStatus, Incident, IncidentState,
    IncidentSummary, Indicator, PendingAction, RemediationOutcome, RemediationRecord, Severity,
    SeverityVerdict,
};
pub use plan::{action_for, action_id, plan_remediation};
pub use retry::RetryPolicy;
pub use traits::{
    ApprovalError, ApprovalService, ComponentStatus, RemediationAction, RemediationError,
    RemediationService,
};
pub use workflow::{WorkflowError, WorkflowTransition, TRANSITIONS};

//! # rr-connectors
//!
//! Boundaries to the external systems Runbook Responder depends on: threat
//! intelligence lookups and the remediation backend that applies containment
//! actions.
//!
//! Real providers plug in by implementing [`ThreatIntelClient`] or
//! [`RemediationBackend`]; the mocks here are used by tests and by the demo
//! configuration of the CLI.

pub mod backend;
pub mod threat_intel;
pub mod traits;

pub use traits::{
    ActionKind, BackendError, BackendOutcome, BackendReport, BackendRequest, Connector,
    ConnectorError, ConnectorHealth, ConnectorResult, EnrichmentResult, IndicatorKind,
    RemediationBackend, Reputation, ThreatIntelClient,
};

pub use backend::{DemoBrowserBackend, MockBackendBehavior, MockRemediationBackend, SessionTracker};
pub use threat_intel::{MockBehavior, MockThreatIntelClient};

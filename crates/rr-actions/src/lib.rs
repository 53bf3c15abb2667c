//! # rr-actions
//!
//! Remediation execution for Runbook Responder.
//!
//! [`RemediationExecutor`] is the engine's [`rr_core::RemediationService`].
//! It applies each action through a [`rr_connectors::RemediationBackend`] at
//! most once per `action_id`, retrying transient failures within a bound and
//! recording every attempt and the final result on the incident.

pub mod executor;

pub use executor::{ExecutorConfig, RemediationExecutor};
pub use rr_core::RemediationError;

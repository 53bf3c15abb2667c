//! Connector trait definitions for Runbook Responder.
//!
//! The workflow engine talks to two kinds of external systems: a threat
//! intelligence source that scores single indicators, and a remediation
//! backend that physically applies containment actions. Both are black boxes
//! behind the traits in this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Connector is healthy and operational.
    Healthy,
    /// Connector is degraded but still functional.
    Degraded(String),
    /// Connector is unhealthy and not operational.
    Unhealthy(String),
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "threat_intel", "remediation").
    fn connector_type(&self) -> &str;

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;
}

// ---------------------------------------------------------------------------
// Threat intelligence
// ---------------------------------------------------------------------------

/// Kind of an indicator of compromise.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ip,
    Domain,
    Hash,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ip => "ip",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Hash => "hash",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" => Ok(IndicatorKind::Ip),
            "domain" => Ok(IndicatorKind::Domain),
            "hash" => Ok(IndicatorKind::Hash),
            other => Err(ConnectorError::InvalidRequest(format!(
                "unknown indicator kind: {}",
                other
            ))),
        }
    }
}

/// Reputation verdict for an indicator.
///
/// Variants are declared from least to most severe so that `Ord` gives the
/// worst-case reputation via `max()`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reputation {
    Unknown,
    Benign,
    Suspicious,
    Malicious,
}

impl fmt::Display for Reputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reputation::Unknown => "unknown",
            Reputation::Benign => "benign",
            Reputation::Suspicious => "suspicious",
            Reputation::Malicious => "malicious",
        };
        f.write_str(s)
    }
}

/// Normalized result of looking up one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    /// The indicator value as looked up.
    pub indicator: String,
    /// Kind of the indicator.
    pub kind: IndicatorKind,
    /// Reputation verdict.
    pub reputation: Reputation,
    /// Confidence in the verdict, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Free-text classification label (e.g. "phishing").
    pub category: String,
    /// Providers that contributed, in order.
    pub sources: Vec<String>,
}

impl EnrichmentResult {
    /// Builds a result, clamping the confidence into `[0, 1]`.
    pub fn new(
        indicator: impl Into<String>,
        kind: IndicatorKind,
        reputation: Reputation,
        confidence: f64,
        category: impl Into<String>,
        sources: Vec<String>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            indicator: indicator.into(),
            kind,
            reputation,
            confidence,
            category: category.into(),
            sources,
        }
    }

    /// The degraded result used when a lookup fails or times out.
    pub fn unknown(indicator: impl Into<String>, kind: IndicatorKind) -> Self {
        Self::new(indicator, kind, Reputation::Unknown, 0.0, "unknown", Vec::new())
    }
}

/// Threat intelligence lookup service.
#[async_trait]
pub trait ThreatIntelClient: Connector {
    /// Looks up a single indicator.
    async fn lookup(&self, indicator: &str, kind: IndicatorKind)
        -> ConnectorResult<EnrichmentResult>;
}

// ---------------------------------------------------------------------------
// Remediation backend
// ---------------------------------------------------------------------------

/// A containment action the backend knows how to apply.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Block an IP address at the firewall.
    Quarantine,
    /// Network-isolate an endpoint.
    Isolate,
    /// Block a domain at the DNS/web proxy layer.
    BlockDomain,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Quarantine => "quarantine",
            ActionKind::Isolate => "isolate",
            ActionKind::BlockDomain => "block_domain",
        }
    }

    /// Name of the parameter carrying the target for this action.
    pub fn target_param(&self) -> &'static str {
        match self {
            ActionKind::Quarantine => "target_ip",
            ActionKind::Isolate => "hostname",
            ActionKind::BlockDomain => "domain",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quarantine" => Ok(ActionKind::Quarantine),
            "isolate" => Ok(ActionKind::Isolate),
            "block_domain" => Ok(ActionKind::BlockDomain),
            other => Err(BackendError::Semantic(format!("Unknown action: {}", other))),
        }
    }
}

/// Outcome reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOutcome {
    Success,
    Failed,
    PartiallyApplied,
}

/// A request to apply one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Idempotency key; stable across retries of the same logical action.
    pub action_id: String,
    pub kind: ActionKind,
    pub target: String,
    pub params: HashMap<String, String>,
}

/// What the backend returns for an applied action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReport {
    pub outcome: BackendOutcome,
    /// Ordered sub-step log.
    pub evidence: Vec<String>,
    /// Opaque reference to the backend session that did the work.
    pub session_id: String,
    pub recording_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Errors from a remediation backend.
///
/// Only `Transient` errors are eligible for retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network failure, timeout, or temporary unavailability.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The backend explicitly refused or failed the action.
    #[error("Backend rejected action: {0}")]
    Semantic(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Executes containment actions against a target system.
#[async_trait]
pub trait RemediationBackend: Connector {
    /// Applies one action.
    async fn perform_action(&self, request: &BackendRequest) -> Result<BackendReport, BackendError>;
}

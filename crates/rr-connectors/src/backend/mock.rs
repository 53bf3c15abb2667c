//! Mock remediation backend for testing.

use crate::traits::{
    BackendError, BackendOutcome, BackendReport, BackendRequest, Connector, ConnectorHealth,
    ConnectorResult, RemediationBackend,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Programmable behavior for [`MockRemediationBackend`].
#[derive(Debug, Clone, Default)]
pub enum MockBackendBehavior {
    /// Every call succeeds.
    #[default]
    Succeed,
    /// The first `failures` calls fail transiently, later calls succeed.
    TransientFailures { failures: u64 },
    /// Every call fails transiently.
    AlwaysTransient,
    /// Every call is rejected by the backend.
    Reject(String),
    /// Every call completes with the given outcome.
    Outcome(BackendOutcome),
    /// Sleep before succeeding.
    WithLatency(Duration),
}

/// In-memory remediation backend that counts calls.
pub struct MockRemediationBackend {
    name: String,
    behavior: Arc<RwLock<MockBackendBehavior>>,
    call_count: AtomicU64,
    calls_by_action: Arc<RwLock<HashMap<String, u64>>>,
}

impl MockRemediationBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: Arc::new(RwLock::new(MockBackendBehavior::Succeed)),
            call_count: AtomicU64::new(0),
            calls_by_action: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_behavior(name: &str, behavior: MockBackendBehavior) -> Self {
        Self {
            behavior: Arc::new(RwLock::new(behavior)),
            ..Self::new(name)
        }
    }

    pub async fn set_behavior(&self, behavior: MockBackendBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Total calls across all actions.
    pub fn get_call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls made for one action id.
    pub async fn calls_for(&self, action_id: &str) -> u64 {
        self.calls_by_action
            .read()
            .await
            .get(action_id)
            .copied()
            .unwrap_or(0)
    }

    fn report(request: &BackendRequest, call: u64, outcome: BackendOutcome) -> BackendReport {
        BackendReport {
            outcome,
            evidence: vec![
                format!("Received {} for {}", request.kind, request.target),
                format!("Applied {} to {}", request.kind, request.target),
            ],
            session_id: format!("mock-session-{}", call),
            recording_url: None,
            screenshot_url: None,
            completed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Connector for MockRemediationBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "remediation"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match &*self.behavior.read().await {
            MockBackendBehavior::AlwaysTransient => {
                Ok(ConnectorHealth::Unhealthy("Always failing".to_string()))
            }
            _ => Ok(ConnectorHealth::Healthy),
        }
    }
}

#[async_trait]
impl RemediationBackend for MockRemediationBackend {
    async fn perform_action(&self, request: &BackendRequest) -> Result<BackendReport, BackendError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut by_action = self.calls_by_action.write().await;
            *by_action.entry(request.action_id.clone()).or_insert(0) += 1;
        }

        let behavior = self.behavior.read().await.clone();
        match behavior {
            MockBackendBehavior::Succeed => {
                Ok(Self::report(request, call, BackendOutcome::Success))
            }
            MockBackendBehavior::TransientFailures { failures } => {
                if call <= failures {
                    Err(BackendError::Transient(format!(
                        "connection reset (attempt {})",
                        call
                    )))
                } else {
                    Ok(Self::report(request, call, BackendOutcome::Success))
                }
            }
            MockBackendBehavior::AlwaysTransient => {
                Err(BackendError::Transient("network unreachable".to_string()))
            }
            MockBackendBehavior::Reject(reason) => Err(BackendError::Semantic(reason)),
            MockBackendBehavior::Outcome(outcome) => Ok(Self::report(request, call, outcome)),
            MockBackendBehavior::WithLatency(latency) => {
                tokio::time::sleep(latency).await;
                Ok(Self::report(request, call, BackendOutcome::Success))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ActionKind;

    fn request(action_id: &str) -> BackendRequest {
        BackendRequest {
            action_id: action_id.to_string(),
            kind: ActionKind::Quarantine,
            target: "10.0.0.50".to_string(),
            params: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let backend = MockRemediationBackend::with_behavior(
            "mock",
            MockBackendBehavior::TransientFailures { failures: 2 },
        );

        assert!(backend.perform_action(&request("a")).await.unwrap_err().is_transient());
        assert!(backend.perform_action(&request("a")).await.is_err());
        assert!(backend.perform_action(&request("a")).await.is_ok());
        assert_eq!(backend.calls_for("a").await, 3);
    }

    #[tokio::test]
    async fn test_reject_is_semantic() {
        let backend =
            MockRemediationBackend::with_behavior("mock", MockBackendBehavior::Reject("nope".into()));
        let err = backend.perform_action(&request("a")).await.unwrap_err();
        assert_eq!(err, BackendError::Semantic("nope".to_string()));
        assert!(!err.is_transient());
    }
}

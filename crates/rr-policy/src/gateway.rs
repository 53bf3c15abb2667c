//! Approval gateway for remediation actions requiring human sign-off.
//!
//! The gateway keeps the registry of open requests and tells approvers
//! about new ones. It never waits: decisions come back through
//! [`ApprovalService::resolve`], and deadlines are enforced by whoever calls
//! [`ApprovalService::expire_due`] on a schedule. An expired request is a
//! denial.

use crate::notifications::{LogNotifier, Notification, Notifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rr_core::{
    ApprovalDecision, ApprovalError, ApprovalRequest, ApprovalService, ApprovalStatus, Severity,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Configuration for the approval gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long decided requests stay queryable before being dropped from
    /// the registry. The incident log keeps them regardless.
    pub decided_retention: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            decided_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// In-process registry of approval requests.
#[derive(Clone)]
pub struct ApprovalGateway {
    requests: Arc<RwLock<HashMap<Uuid, ApprovalRequest>>>,
    notifier: Arc<dyn Notifier>,
    config: GatewayConfig,
}

impl ApprovalGateway {
    /// Creates a gateway that notifies approvers through `notifier`.
    pub fn new(notifier: Arc<dyn Notifier>, config: GatewayConfig) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            notifier,
            config,
        }
    }

    /// Number of requests in the registry, decided ones included.
    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }

    fn retention(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.decided_retention)
            .unwrap_or_else(|_| ChronoDuration::days(1))
    }
}

impl Default for ApprovalGateway {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier::new("approvals")), GatewayConfig::default())
    }
}

#[async_trait]
impl ApprovalService for ApprovalGateway {
    fn build_request(
        &self,
        incident_id: Uuid,
        target: &str,
        severity: Severity,
        justification: &str,
        timeout: Duration,
    ) -> ApprovalRequest {
        ApprovalRequest::pending(incident_id, target, severity, justification, timeout)
    }

    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn submit(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        if !request.is_pending() {
            return Err(ApprovalError::Invalid(format!(
                "request {} is already {}",
                request.request_id, request.status
            )));
        }
        if request.target.trim().is_empty() {
            return Err(ApprovalError::Invalid("target must not be empty".to_string()));
        }

        {
            let mut requests = self.requests.write().await;
            if requests.contains_key(&request.request_id) {
                return Err(ApprovalError::Invalid(format!(
                    "request {} already submitted",
                    request.request_id
                )));
            }
            requests.insert(request.request_id, request.clone());
        }

        info!(
            incident_id = %request.incident_id,
            target = %request.target,
            severity = %request.severity,
            expires_at = %request.expires_at,
            "Approval request submitted"
        );

        // An undelivered notification still leaves the request to expire.
        let notification = Notification::approval_required(request);
        if let Err(e) = self.notifier.send(&notification).await {
            metrics::counter!("rr_approval_notifications_failed_total").increment(1);
            warn!(
                notifier = %self.notifier.name(),
                error = %e,
                "Failed to notify approvers"
            );
        }
        Ok(())
    }

    async fn restore(&self, request: &ApprovalRequest) {
        let mut requests = self.requests.write().await;
        requests
            .entry(request.request_id)
            .or_insert_with(|| request.clone());
    }

    #[instrument(skip(self, decided_by, comment), fields(request_id = %request_id))]
    async fn resolve(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&request_id)
            .ok_or(ApprovalError::NotFound(request_id))?;

        if !request.is_pending() {
            return Err(ApprovalError::AlreadyDecided {
                request_id,
                status: request.status,
            });
        }

        let now = Utc::now();
        if request.is_overdue(now) {
            request.decide(ApprovalStatus::Expired, None, None, now);
            warn!(expires_at = %request.expires_at, "Decision arrived after the deadline");
            return Err(ApprovalError::Expired(request_id));
        }

        request.decide(decision.into(), decided_by, comment, now);
        info!(
            incident_id = %request.incident_id,
            status = %request.status,
            decided_by = request.decided_by.as_deref().unwrap_or("-"),
            "Approval request decided"
        );
        Ok(request.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Vec<ApprovalRequest> {
        let mut requests = self.requests.write().await;
        let mut expired = Vec::new();

        for request in requests.values_mut() {
            if request.is_overdue(now) {
                request.decide(ApprovalStatus::Expired, None, None, now);
                info!(
                    request_id = %request.request_id,
                    incident_id = %request.incident_id,
                    "Approval request expired"
                );
                expired.push(request.clone());
            }
        }

        let horizon = now - self.retention();
        requests.retain(|_, r| r.decided_at.map_or(true, |at| at >= horizon));
        drop(requests);

        if !expired.is_empty() {
            warn!(count = expired.len(), "Expired approval requests");
        }
        for request in &expired {
            if let Err(e) = self.notifier.send(&Notification::approval_expired(request)).await {
                warn!(request_id = %request.request_id, error = %e, "Failed to announce expiry");
            }
        }
        expired
    }

    async fn get(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.requests.read().await.get(&request_id).cloned()
    }

    async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let requests = self.requests.read().await;
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.is_pending() && !r.is_overdue(now))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}

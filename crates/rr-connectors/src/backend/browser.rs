//! Browser-automation remediation backend.
//!
//! Each action runs inside a browser session that is opened for the action
//! and closed when the [`BrowserSession`] guard drops, which also covers the
//! error path and the case where the calling future is cancelled.

use crate::traits::{
    ActionKind, BackendError, BackendOutcome, BackendReport, BackendRequest, Connector,
    ConnectorHealth, ConnectorResult, RemediationBackend,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for a single browser session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Tracks open browser sessions.
///
/// Uses a std mutex because sessions are released from `Drop`.
#[derive(Debug, Default)]
pub struct SessionTracker {
    open: Mutex<HashSet<String>>,
    opened_total: AtomicU64,
    closed_total: AtomicU64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session and returns its guard.
    pub fn open(self: &Arc<Self>) -> BrowserSession {
        let id = format!("demo-session-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        if let Ok(mut open) = self.open.lock() {
            open.insert(id.clone());
        }
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = %id, "Browser session opened");
        BrowserSession {
            id,
            tracker: Arc::clone(self),
        }
    }

    fn close(&self, id: &str) {
        let removed = match self.open.lock() {
            Ok(mut open) => open.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        };
        if removed {
            self.closed_total.fetch_add(1, Ordering::SeqCst);
            debug!(session_id = %id, "Browser session closed");
        }
    }

    /// Number of sessions currently open.
    pub fn open_count(&self) -> usize {
        match self.open.lock() {
            Ok(open) => open.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn opened_total(&self) -> u64 {
        self.opened_total.load(Ordering::SeqCst)
    }

    pub fn closed_total(&self) -> u64 {
        self.closed_total.load(Ordering::SeqCst)
    }
}

/// Scoped browser session; closes itself on drop.
#[derive(Debug)]
pub struct BrowserSession {
    id: String,
    tracker: Arc<SessionTracker>,
}

impl BrowserSession {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.tracker.close(&self.id);
    }
}

/// Demo backend that simulates console automation and returns a
/// recording-backed audit trail.
pub struct DemoBrowserBackend {
    name: String,
    sessions: Arc<SessionTracker>,
    session_timeout: Duration,
    step_delay: Duration,
    recording_base_url: String,
}

impl DemoBrowserBackend {
    pub fn new() -> Self {
        Self {
            name: "demo-browser".to_string(),
            sessions: Arc::new(SessionTracker::new()),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            step_delay: Duration::ZERO,
            recording_base_url: "https://demo-recordings.example.com".to_string(),
        }
    }

    /// Overrides the session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Adds a simulated delay to every sub-step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// The session tracker, for inspecting open sessions.
    pub fn sessions(&self) -> Arc<SessionTracker> {
        Arc::clone(&self.sessions)
    }

    fn steps_for(kind: ActionKind, target: &str) -> Vec<String> {
        match kind {
            ActionKind::Quarantine => vec![
                "Navigated to firewall console".to_string(),
                format!("Added {} to blocklist", target),
                "Saved configuration".to_string(),
                "Verified IP is blocked".to_string(),
            ],
            ActionKind::Isolate => vec![
                "Navigated to endpoint protection console".to_string(),
                format!("Located endpoint {}", target),
                format!("Applied network isolation to {}", target),
                "Verified endpoint is isolated".to_string(),
            ],
            ActionKind::BlockDomain => vec![
                "Navigated to DNS filtering console".to_string(),
                format!("Added {} to blocklist", target),
                "Saved configuration".to_string(),
                "Verified domain is blocked".to_string(),
            ],
        }
    }

    async fn run_steps(
        &self,
        session: &BrowserSession,
        request: &BackendRequest,
    ) -> Result<BackendReport, BackendError> {
        let target = request
            .params
            .get(request.kind.target_param())
            .cloned()
            .unwrap_or_else(|| request.target.clone());
        if target.trim().is_empty() {
            return Err(BackendError::Semantic(format!(
                "missing parameter '{}'",
                request.kind.target_param()
            )));
        }

        let mut evidence = Vec::new();
        for step in Self::steps_for(request.kind, &target) {
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            debug!(session_id = %session.id(), step = %step, "Browser step completed");
            evidence.push(step);
        }

        Ok(BackendReport {
            outcome: BackendOutcome::Success,
            evidence,
            session_id: session.id().to_string(),
            recording_url: Some(format!("{}/{}.mp4", self.recording_base_url, session.id())),
            screenshot_url: Some(format!("{}/{}.png", self.recording_base_url, session.id())),
            completed_at: Utc::now(),
        })
    }
}

impl Default for DemoBrowserBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for DemoBrowserBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "remediation"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(ConnectorHealth::Healthy)
    }
}

#[async_trait]
impl RemediationBackend for DemoBrowserBackend {
    async fn perform_action(&self, request: &BackendRequest) -> Result<BackendReport, BackendError> {
        let session = self.sessions.open();
        info!(
            action_id = %request.action_id,
            action = %request.kind,
            target = %request.target,
            session_id = %session.id(),
            "Executing browser action"
        );

        match tokio::time::timeout(self.session_timeout, self.run_steps(&session, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session.id(), "Browser session timed out");
                Err(BackendError::Transient(format!(
                    "browser session {} timed out after {}s",
                    session.id(),
                    self.session_timeout.as_secs()
                )))
            }
        }
    }
}

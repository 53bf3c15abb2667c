//! Notification channels for approvers.
//!
//! Delivery is best effort. The approval gateway logs a failed delivery and
//! relies on the request deadline to fail closed.

mod webhook;

pub use webhook::{WebhookNotifier, WebhookPayload};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_core::{ApprovalRequest, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Errors that can occur when sending notifications.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),

    #[error("Invalid notification configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A remediation is waiting for a human decision.
    ApprovalRequired,
    /// Nobody decided in time; the remediation was denied.
    ApprovalExpired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApprovalRequired => "approval_required",
            NotificationKind::ApprovalExpired => "approval_expired",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::ApprovalRequired => write!(f, "Approval Required"),
            NotificationKind::ApprovalExpired => write!(f, "Approval Expired"),
        }
    }
}

/// Delivery priority, derived from incident severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<Severity> for NotificationPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => NotificationPriority::Low,
            Severity::Medium => NotificationPriority::Normal,
            Severity::High => NotificationPriority::High,
            Severity::Critical => NotificationPriority::Urgent,
        }
    }
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }
}

/// A message for the human channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    /// Machine-readable fields: incident id, request id, target, severity,
    /// expiry.
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: NotificationPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
            priority,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Asks approvers to decide on `request`.
    pub fn approval_required(request: &ApprovalRequest) -> Self {
        Self::new(
            NotificationKind::ApprovalRequired,
            format!("{} remediation awaiting approval: {}", request.severity, request.target),
            format!(
                "{}\nDecide before {} using request id {}.",
                request.justification,
                request.expires_at.to_rfc3339(),
                request.request_id
            ),
            request.severity.into(),
        )
        .with_request(request)
    }

    /// Tells approvers that `request` ran out of time and was denied.
    pub fn approval_expired(request: &ApprovalRequest) -> Self {
        Self::new(
            NotificationKind::ApprovalExpired,
            format!("Approval expired for {}", request.target),
            format!(
                "No decision before {}; the remediation was denied.",
                request.expires_at.to_rfc3339()
            ),
            request.severity.into(),
        )
        .with_request(request)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn with_request(self, request: &ApprovalRequest) -> Self {
        self.with_metadata("incident_id", request.incident_id.to_string())
            .with_metadata("request_id", request.request_id.to_string())
            .with_metadata("target", request.target.clone())
            .with_metadata("severity", request.severity.to_string())
            .with_metadata("expires_at", request.expires_at.to_rfc3339())
    }
}

/// A channel that can deliver notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;

    fn name(&self) -> &str;
}

/// Writes notifications to the log. The default channel.
#[derive(Debug, Default)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    #[instrument(skip(self, notification), fields(notifier = %self.name))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            notification_id = %notification.id,
            kind = notification.kind.as_str(),
            priority = notification.priority.as_str(),
            title = %notification.title,
            incident_id = notification.metadata.get("incident_id").map(String::as_str).unwrap_or("-"),
            request_id = notification.metadata.get("request_id").map(String::as_str).unwrap_or("-"),
            "Notification"
        );
        debug!(message = %notification.message, "Notification body");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fans a notification out to several channels.
///
/// Succeeds when at least one channel delivered, unless configured to stop
/// at the first failure.
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
    continue_on_error: bool,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self {
            notifiers: Vec::new(),
            continue_on_error: true,
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn add_notifier<N: Notifier + 'static>(mut self, notifier: N) -> Self {
        self.notifiers.push(Arc::new(notifier));
        self
    }

    pub fn add_arc_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for CompositeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    #[instrument(skip(self, notification), fields(notifier_count = self.notifiers.len()))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if self.notifiers.is_empty() {
            warn!("No notification channels configured");
            return Ok(());
        }

        let mut errors = Vec::new();
        for notifier in &self.notifiers {
            match notifier.send(notification).await {
                Ok(()) => debug!(notifier = %notifier.name(), "Notification delivered"),
                Err(e) => {
                    error!(notifier = %notifier.name(), error = %e, "Notification failed");
                    if !self.continue_on_error {
                        return Err(e);
                    }
                    errors.push(format!("{}: {}", notifier.name(), e));
                }
            }
        }

        if errors.len() == self.notifiers.len() {
            return Err(NotificationError::SendFailed(errors.join("; ")));
        }
        if !errors.is_empty() {
            warn!(
                failed = errors.len(),
                total = self.notifiers.len(),
                "Some notification channels failed"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "composite"
    }
}

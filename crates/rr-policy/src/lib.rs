//! # rr-policy
//!
//! Human approval for Runbook Responder.
//!
//! [`ApprovalGateway`] is the engine's [`rr_core::ApprovalService`]: it holds
//! pending requests, applies decisions exactly once and expires requests
//! nobody decided on. Approvers hear about requests through a [`Notifier`].

pub mod gateway;
pub mod notifications;

pub use gateway::{ApprovalGateway, GatewayConfig};
pub use notifications::{
    CompositeNotifier, LogNotifier, Notification, NotificationError, NotificationKind,
    NotificationPriority, Notifier, WebhookNotifier,
};
pub use rr_core::ApprovalError;

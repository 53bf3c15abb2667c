//! JSON webhook channel.

use super::{Notification, NotificationError, Notifier};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Posts notifications as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    headers: HashMap<String, String>,
    #[cfg(not(test))]
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Creates a notifier posting to `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(NotificationError::InvalidConfig(
                "Webhook URL cannot be empty".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NotificationError::InvalidConfig(format!(
                "Webhook URL must be http(s): {url}"
            )));
        }

        #[cfg(not(test))]
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;
        #[cfg(test)]
        let _ = timeout;

        Ok(Self {
            url,
            headers: HashMap::new(),
            #[cfg(not(test))]
            client,
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.into()))
    }

    fn create_payload(&self, notification: &Notification) -> WebhookPayload {
        WebhookPayload {
            id: notification.id.to_string(),
            kind: notification.kind.as_str().to_string(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            priority: notification.priority.as_str().to_string(),
            metadata: notification.metadata.clone(),
            created_at: notification.created_at.to_rfc3339(),
        }
    }

    #[cfg(not(test))]
    async fn post(&self, payload: &WebhookPayload) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.url).json(payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(NotificationError::RateLimited(
                "Webhook rate limit exceeded".to_string(),
            ))
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            Err(NotificationError::SendFailed(format!(
                "Webhook returned {status}: {body}"
            )))
        }
    }

    #[cfg(test)]
    async fn post(&self, _payload: &WebhookPayload) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(url = %self.url))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = self.create_payload(notification);
        debug!(notification_id = %notification.id, "Posting notification to webhook");

        self.post(&payload).await.map_err(|e| {
            error!(notification_id = %notification.id, error = %e, "Webhook delivery failed");
            e
        })
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Body posted to the webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub priority: String,
    pub metadata: BTreeMap<String, String>,
    /// RFC 3339.
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rr_core::{ApprovalRequest, Severity};
    use uuid::Uuid;

    fn notifier() -> WebhookNotifier {
        WebhookNotifier::new("https://hooks.example.com/approvals", Duration::from_secs(5)).unwrap()
    }

    fn notification() -> Notification {
        let req = ApprovalRequest::pending(
            Uuid::new_v4(),
            "ws-042",
            Severity::High,
            "isolate ws-042",
            Duration::from_secs(600),
        );
        Notification::approval_required(&req)
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            WebhookNotifier::new("", Duration::from_secs(5)),
            Err(NotificationError::InvalidConfig(_))
        ));
        assert!(matches!(
            WebhookNotifier::new("ftp://example.com", Duration::from_secs(5)),
            Err(NotificationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_headers() {
        let n = notifier()
            .with_bearer_token("secret")
            .with_header("X-Source", "rr");
        assert_eq!(n.headers.get("Authorization").map(String::as_str), Some("Bearer secret"));
        assert_eq!(n.headers.len(), 2);
    }

    #[test]
    fn test_payload_shape() {
        let notification = notification();
        let json = serde_json::to_value(notifier().create_payload(&notification)).unwrap();

        assert_eq!(json["id"], notification.id.to_string());
        assert_eq!(json["kind"], "approval_required");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["metadata"]["target"], "ws-042");
        assert!(json["created_at"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_send() {
        assert!(notifier().send(&notification()).await.is_ok());
        assert_eq!(notifier().name(), "webhook");
    }
}

//! Outbound tenant notifications.
//!
//! Delivery is fire-and-forget: callers hand a [`Notification`] to the
//! [`NotificationDispatcher`], which sends it on a background task and only
//! logs failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Notification event types.
pub mod kinds {
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const MODULES_UPDATED: &str = "tenant.modules_updated";
    pub const STATUS_CHANGED: &str = "tenant.status_changed";
    pub const ACCOUNT_LOCKED: &str = "identity.locked";
    /// Carries a one-time code for SMS/email delivery.
    pub const MFA_CODE_ISSUED: &str = "mfa.code_issued";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(tenant_id: Uuid, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type: event_type.to_string(),
            data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to serialize notification: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned {0}")]
    Status(reqwest::StatusCode),

    #[error("Invalid signing key")]
    SigningKey,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no webhook is configured. Logs the event type only; payloads
/// may carry one-time codes.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            tenant_id = %notification.tenant_id,
            event_type = %notification.event_type,
            notification_id = %notification.id,
            "Notification (no webhook configured)"
        );
        Ok(())
    }
}

/// Posts notifications as JSON, signed with HMAC-SHA256 over
/// `"{timestamp}.{body}"`.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
        })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> Result<String, NotifyError> {
    let message = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| NotifyError::SigningKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_string(notification)?;
        let timestamp = Utc::now().timestamp();
        let signature = sign_payload(&self.secret, timestamp, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-AuthCore-Signature", format!("sha256={}", signature))
            .header("X-AuthCore-Timestamp", timestamp.to_string())
            .header("X-AuthCore-Event-ID", notification.id.to_string())
            .header("X-AuthCore-Event-Type", &notification.event_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        Ok(())
    }
}

/// Keeps every notification in memory. For development and tests.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Wait briefly for a notification of the given type to arrive; dispatch
    /// happens on a background task.
    pub async fn wait_for(&self, event_type: &str) -> Option<Notification> {
        for _ in 0..100 {
            if let Some(found) = self
                .sent
                .lock()
                .iter()
                .rev()
                .find(|n| n.event_type == event_type)
                .cloned()
            {
                return Some(found);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotifier))
    }

    pub fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    tenant_id = %notification.tenant_id,
                    event_type = %notification.event_type,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_covers_timestamp_and_body() {
        let a = sign_payload("whsec", 1_700_000_000, r#"{"a":1}"#).unwrap();
        let b = sign_payload("whsec", 1_700_000_001, r#"{"a":1}"#).unwrap();
        let c = sign_payload("other", 1_700_000_000, r#"{"a":1}"#).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, sign_payload("whsec", 1_700_000_000, r#"{"a":1}"#).unwrap());
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let memory = Arc::new(MemoryNotifier::new());
        let dispatcher = NotificationDispatcher::new(memory.clone());
        let tenant_id = Uuid::new_v4();

        dispatcher.dispatch(Notification::new(tenant_id, kinds::TENANT_CREATED, serde_json::json!({})));

        let delivered = memory.wait_for(kinds::TENANT_CREATED).await.unwrap();
        assert_eq!(delivered.tenant_id, tenant_id);
        assert!(memory.wait_for(kinds::STATUS_CHANGED).await.is_none());
    }
}

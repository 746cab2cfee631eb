//! Fire-and-forget notifications to tenants.
//!
//! Delivery failures are reported to the caller as [`NotifyError`]; the
//! orchestrator logs them and carries on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use vm_config::{NotificationSettings, NotifierKind};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery to {recipient} failed: {message}")]
    Delivery { recipient: String, message: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError>;
}

/// Writes notifications to the log under the `notifications` target.
#[derive(Debug, Default)]
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError> {
        tracing::info!(
            target: "notifications",
            from = %self.sender,
            to = %notification.recipient,
            subject = %notification.subject,
            "{}",
            notification.body
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// POSTs each notification as JSON to a mail relay or chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    sender: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError> {
        let payload = WebhookPayload {
            from: &self.sender,
            to: &notification.recipient,
            subject: &notification.subject,
            body: &notification.body,
        };

        let delivery_error = |message: String| NotifyError::Delivery {
            recipient: notification.recipient.clone(),
            message,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| delivery_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(delivery_error(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Build the configured notifier.
pub fn from_settings(settings: &NotificationSettings) -> Result<Arc<dyn Notifier>> {
    match settings.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier::new(settings.sender.clone()))),
        NotifierKind::Webhook => {
            let url = settings.webhook_url.as_deref().ok_or_else(|| {
                OrchestratorError::InvalidInput(
                    "webhook notifications need notifications.webhook_url".to_string(),
                )
            })?;
            Ok(Arc::new(WebhookNotifier::new(url, settings.sender.clone())))
        }
    }
}

/// Keeps every notification in memory; optionally refuses them all.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Notification>>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts so far, including refused ones.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier state poisoned").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier state poisoned")
            .push(notification.clone());

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Delivery {
                recipient: notification.recipient.clone(),
                message: "refused".to_string(),
            });
        }
        Ok(())
    }
}

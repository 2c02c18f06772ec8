//! Webhook notification backend: POSTs deployment details to the evaluator
//! URL as JSON. Client errors are rejections (the evaluator refused the
//! payload); everything else is retried by the gateway.

use async_trait::async_trait;

use crate::gateway::{BackendError, Notification, NotificationBackend};

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl NotificationBackend for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| BackendError::transient(format!("notify request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(
                project_id = %notification.project_id,
                round = notification.round_number,
                status = status.as_u16(),
                "evaluator acknowledged notification"
            );
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        let message = format!("evaluator returned HTTP {}: {:.200}", status, text);
        if status.is_client_error() {
            Err(BackendError::rejected(message))
        } else {
            Err(BackendError::transient(message))
        }
    }
}

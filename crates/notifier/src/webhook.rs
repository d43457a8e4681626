use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::{Alert, NotificationChannel, NotificationError};

/// Discord-shaped chat webhook sink (§6 "chat webhook formatters"), grounded
/// on the corpus's `DiscordNotifier::send_message`.
pub struct WebhookChannel {
    client: Client,
    webhook_url: String,
}

impl WebhookChannel {
    pub fn new(webhook_url: String) -> Self {
        Self { client: Client::new(), webhook_url }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        if self.webhook_url.is_empty() {
            return Err(NotificationError::Config("webhook URL not configured".to_string()));
        }

        let payload = json!({
            "username": "Trading Engine",
            "embeds": [{
                "title": alert.title,
                "description": alert.message,
                "timestamp": alert.created_at.to_rfc3339(),
            }],
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        tracing::debug!("webhook alert sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

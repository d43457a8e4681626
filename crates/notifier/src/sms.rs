use async_trait::async_trait;
use reqwest::Client;

use crate::{Alert, NotificationChannel, NotificationError};

/// Generic SMS gateway sink: posts `{to, from, body}` to a provider's REST
/// endpoint (Twilio-shaped; swap `api_url` for another provider without
/// changing the trait contract).
pub struct SmsChannel {
    client: Client,
    api_url: String,
    api_key: String,
    from_number: String,
    to_number: String,
}

impl SmsChannel {
    pub fn new(api_url: String, api_key: String, from_number: String, to_number: String) -> Self {
        Self { client: Client::new(), api_url, api_key, from_number, to_number }
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        if self.api_url.is_empty() {
            return Err(NotificationError::Config("SMS gateway not configured".to_string()));
        }

        let body = alert.sms_text();
        self.client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from_number,
                "to": self.to_number,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        tracing::debug!("SMS alert sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "sms"
    }
}

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{format_message, ChannelError, NotificationChannel, Priority};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts messages to a team chat incoming-webhook endpoint.
///
/// The webhook addresses a fixed room, so the recipient only appears in
/// the message text.
pub struct ChatWebhookChannel {
    client: reqwest::Client,
    webhook_url: String,
}

impl ChatWebhookChannel {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl NotificationChannel for ChatWebhookChannel {
    fn name(&self) -> &'static str {
        "chat_webhook"
    }

    async fn send(
        &self,
        recipient: &str,
        title: &str,
        body: &str,
        priority: Priority,
    ) -> Result<(), ChannelError> {
        let payload = json!({
            "text": format!("{}\n{}", recipient, format_message(title, body, priority)),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }
        debug!(recipient = %recipient, "Chat webhook notification delivered");
        Ok(())
    }
}

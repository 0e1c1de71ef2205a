use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{format_message, ChannelError, NotificationChannel, Priority};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends messages through a bot-API style messaging service into a
/// configured chat.
pub struct MessagingChannel {
    client: reqwest::Client,
    api_url: String,
    chat_id: String,
}

impl MessagingChannel {
    pub fn new(api_url: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            chat_id,
        }
    }
}

#[async_trait]
impl NotificationChannel for MessagingChannel {
    fn name(&self) -> &'static str {
        "messaging"
    }

    async fn send(
        &self,
        recipient: &str,
        title: &str,
        body: &str,
        priority: Priority,
    ) -> Result<(), ChannelError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": format!("{}\n{}", recipient, format_message(title, body, priority)),
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }
        debug!(recipient = %recipient, "Messaging notification delivered");
        Ok(())
    }
}

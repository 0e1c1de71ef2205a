/*!
 * # Notification Dispatch
 *
 * Multi-channel, best-effort notification delivery. Workflow code never
 * waits on or fails because of a notification: every channel gets at most
 * one attempt per trigger, failures are logged, and each attempt's
 * outcome lands in `notification_logs`. Deliveries refused by the rate
 * limiter are parked on a deferred queue and retried ahead of the next
 * dispatch.
 */

pub mod chat_webhook;
pub mod handler;
pub mod in_app;
pub mod messaging;

pub use chat_webhook::ChatWebhookChannel;
pub use handler::NotificationEventHandler;
pub use in_app::InAppChannel;
pub use messaging::MessagingChannel;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::notification_logs,
    message_queue::{InMemoryMessageQueue, Message, MessageQueue},
    rate_limiter::{RateLimitConfig, RateLimiter},
};

const DEFERRED_TOPIC: &str = "notifications.deferred";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Delivery endpoint returned status {0}")]
    Status(u16),
    #[error("Channel misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Message text shared by the outbound channels. Anything above normal
/// priority carries a visible tag.
pub(crate) fn format_message(title: &str, body: &str, priority: Priority) -> String {
    if priority > Priority::Normal {
        format!("[{}] {}\n{}", priority, title, body)
    } else {
        format!("{}\n{}", title, body)
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        recipient: &str,
        title: &str,
        body: &str,
        priority: Priority,
    ) -> Result<(), ChannelError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: u32,
    pub failed: u32,
    pub rate_limited: u32,
}

impl DispatchSummary {
    /// A dispatch succeeds when at least one channel delivered to at
    /// least one recipient.
    pub fn succeeded(&self) -> bool {
        self.delivered > 0
    }
}

/// One delivery parked after a rate-limit refusal, keyed by the channel
/// that refused it.
#[derive(Debug, Serialize, Deserialize)]
struct DeferredDelivery {
    recipient: String,
    channel: String,
    title: String,
    body: String,
    priority: Priority,
}

/// Fans a notification out to every recipient over every configured
/// channel, honoring a per-channel rate limit.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<DatabaseConnection>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    rate_limiter: RateLimiter,
    deferred: Arc<InMemoryMessageQueue>,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(
        db: Arc<DatabaseConnection>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        rate_limiter: RateLimiter,
        enabled: bool,
    ) -> Self {
        Self {
            db,
            channels,
            rate_limiter,
            deferred: Arc::new(InMemoryMessageQueue::new()),
            enabled,
        }
    }

    /// Builds the channel set from configuration. The in-app channel is
    /// always present; outbound channels join when their endpoints are
    /// configured.
    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(InAppChannel)];
        if let Some(url) = &config.chat_webhook_url {
            channels.push(Arc::new(ChatWebhookChannel::new(url.clone())));
        }
        if let (Some(api_url), Some(chat_id)) =
            (&config.messaging_api_url, &config.messaging_chat_id)
        {
            channels.push(Arc::new(MessagingChannel::new(
                api_url.clone(),
                chat_id.clone(),
            )));
        }

        let rate_limiter = RateLimiter::new(RateLimitConfig {
            requests_per_window: config.notification_rate_limit_per_window,
            window_duration: std::time::Duration::from_secs(
                config.notification_rate_limit_window_seconds,
            ),
        });

        Self::new(db, channels, rate_limiter, config.notifications_enabled)
    }

    /// Attempts delivery to every recipient over every channel. Channel
    /// failures are logged and recorded, never returned; rate-limited
    /// attempts are parked on the deferred queue instead of dropped.
    ///
    /// Any backlog from earlier rate limiting is retried first, so the
    /// summary can include deliveries parked by a previous call.
    #[instrument(skip(self, body), fields(recipients = recipients.len(), title = %title))]
    pub async fn dispatch(
        &self,
        recipients: &[String],
        title: &str,
        body: &str,
        priority: Priority,
    ) -> DispatchSummary {
        if !self.enabled {
            debug!("Notifications disabled; dispatch skipped");
            return DispatchSummary::default();
        }

        let mut summary = self.flush_deferred().await;

        for recipient in recipients {
            for channel in &self.channels {
                if self.rate_limiter.try_acquire(channel.name()).is_err() {
                    warn!(
                        channel = channel.name(),
                        recipient = %recipient,
                        "Notification rate limited; delivery parked for retry"
                    );
                    summary.rate_limited += 1;
                    self.park(recipient, channel.name(), title, body, priority)
                        .await;
                    continue;
                }

                if self.attempt(channel, recipient, title, body, priority).await {
                    summary.delivered += 1;
                } else {
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Retries parked deliveries. Each backlog entry gets one attempt;
    /// entries whose channel is still rate limited go back to the queue
    /// until their retry budget runs out.
    pub async fn flush_deferred(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        // Requeued entries land at the back; bounding by the starting
        // depth keeps one flush from spinning on them.
        let backlog = self.deferred.depth(DEFERRED_TOPIC);
        for _ in 0..backlog {
            let message = match self.deferred.pop(DEFERRED_TOPIC).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to pop deferred notification: {}", e);
                    break;
                }
            };
            let delivery: DeferredDelivery = match serde_json::from_value(message.payload.clone())
            {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Discarding malformed deferred notification: {}", e);
                    continue;
                }
            };
            let Some(channel) = self
                .channels
                .iter()
                .find(|c| c.name() == delivery.channel)
            else {
                warn!(
                    channel = %delivery.channel,
                    "Deferred notification for unconfigured channel discarded"
                );
                continue;
            };

            if self.rate_limiter.try_acquire(channel.name()).is_err() {
                summary.rate_limited += 1;
                if message.retry_count + 1 >= message.max_retries {
                    warn!(
                        channel = channel.name(),
                        recipient = %delivery.recipient,
                        "Deferred notification dropped after repeated rate limiting"
                    );
                }
                if let Err(e) = self.deferred.requeue(message).await {
                    warn!("Failed to requeue deferred notification: {}", e);
                }
                continue;
            }

            if self
                .attempt(
                    channel,
                    &delivery.recipient,
                    &delivery.title,
                    &delivery.body,
                    delivery.priority,
                )
                .await
            {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Deliveries waiting on a rate-limit window to reopen.
    pub fn deferred_backlog(&self) -> usize {
        self.deferred.depth(DEFERRED_TOPIC)
    }

    /// One send attempt plus its log row. Returns whether the channel
    /// accepted the delivery.
    async fn attempt(
        &self,
        channel: &Arc<dyn NotificationChannel>,
        recipient: &str,
        title: &str,
        body: &str,
        priority: Priority,
    ) -> bool {
        let result = channel.send(recipient, title, body, priority).await;
        let (success, error_text) = match &result {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(
                    channel = channel.name(),
                    recipient = %recipient,
                    "Notification delivery failed: {}", e
                );
                (false, Some(e.to_string()))
            }
        };
        self.record_outcome(
            recipient,
            channel.name(),
            title,
            body,
            priority,
            success,
            error_text,
        )
        .await;
        success
    }

    async fn park(
        &self,
        recipient: &str,
        channel: &str,
        title: &str,
        body: &str,
        priority: Priority,
    ) {
        let delivery = DeferredDelivery {
            recipient: recipient.to_string(),
            channel: channel.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            priority,
        };
        match serde_json::to_value(&delivery) {
            Ok(payload) => {
                let message = Message::new(DEFERRED_TOPIC.to_string(), payload);
                if let Err(e) = self.deferred.publish(message).await {
                    warn!("Deferred notification queue refused delivery: {}", e);
                }
            }
            Err(e) => error!("Failed to encode deferred notification: {}", e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_outcome(
        &self,
        recipient: &str,
        channel: &str,
        title: &str,
        body: &str,
        priority: Priority,
        success: bool,
        error_text: Option<String>,
    ) {
        let log = notification_logs::ActiveModel {
            id: Set(Uuid::new_v4()),
            recipient: Set(recipient.to_string()),
            channel: Set(channel.to_string()),
            title: Set(title.to_string()),
            body: Set(body.to_string()),
            priority: Set(priority.to_string()),
            success: Set(success),
            error: Set(error_text),
            created_at: Set(Utc::now()),
        };
        if let Err(e) = log.insert(self.db.as_ref()).await {
            // The delivery already happened (or failed); losing the log
            // row must not surface to the workflow caller.
            error!("Failed to record notification outcome: {}", e);
        }
    }
}

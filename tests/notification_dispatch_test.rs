mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::TestContext;
use procurest_api::{
    entities::notification_logs,
    notifications::{
        ChannelError, InAppChannel, NotificationChannel, NotificationDispatcher, Priority,
    },
    rate_limiter::{RateLimitConfig, RateLimiter},
};

fn dispatcher(ctx: &TestContext, limit: u32, window: Duration, enabled: bool) -> NotificationDispatcher {
    NotificationDispatcher::new(
        ctx.db.clone(),
        vec![Arc::new(InAppChannel)],
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_duration: window,
        }),
        enabled,
    )
}

async fn logged_recipients(ctx: &TestContext, title: &str) -> Vec<String> {
    let mut recipients: Vec<String> = notification_logs::Entity::find()
        .filter(notification_logs::Column::Title.eq(title))
        .all(ctx.db.as_ref())
        .await
        .unwrap()
        .into_iter()
        .map(|log| log.recipient)
        .collect();
    recipients.sort();
    recipients
}

#[tokio::test]
async fn rate_limited_deliveries_park_until_the_window_reopens() {
    let ctx = TestContext::new().await;
    let dispatcher = dispatcher(&ctx, 1, Duration::from_millis(50), true);

    let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
    let summary = dispatcher
        .dispatch(&recipients, "Stock alert", "Flour is low", Priority::High)
        .await;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(dispatcher.deferred_backlog(), 1);

    // Still inside the window: the parked delivery goes straight back.
    let summary = dispatcher.flush_deferred().await;
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(dispatcher.deferred_backlog(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let summary = dispatcher.flush_deferred().await;
    assert_eq!(summary.delivered, 1);
    assert_eq!(dispatcher.deferred_backlog(), 0);

    assert_eq!(
        logged_recipients(&ctx, "Stock alert").await,
        vec!["a@example.com".to_string(), "b@example.com".to_string()]
    );
}

#[tokio::test]
async fn the_next_dispatch_drains_the_backlog_first() {
    let ctx = TestContext::new().await;
    let dispatcher = dispatcher(&ctx, 1, Duration::from_millis(50), true);

    let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
    dispatcher
        .dispatch(&recipients, "Stock alert", "Flour is low", Priority::High)
        .await;
    assert_eq!(dispatcher.deferred_backlog(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;

    // The fresh window has one slot; the backlog takes it and the new
    // delivery is parked in its place.
    let summary = dispatcher
        .dispatch(
            &["c@example.com".to_string()],
            "Stock alert",
            "Flour is low",
            Priority::High,
        )
        .await;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(dispatcher.deferred_backlog(), 1);

    assert_eq!(
        logged_recipients(&ctx, "Stock alert").await,
        vec!["a@example.com".to_string(), "b@example.com".to_string()]
    );
}

struct BrokenChannel;

#[async_trait]
impl NotificationChannel for BrokenChannel {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn send(
        &self,
        _recipient: &str,
        _title: &str,
        _body: &str,
        _priority: Priority,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Misconfigured("no endpoint".to_string()))
    }
}

#[tokio::test]
async fn channel_failures_are_recorded_but_never_surface() {
    let ctx = TestContext::new().await;
    let dispatcher = NotificationDispatcher::new(
        ctx.db.clone(),
        vec![Arc::new(BrokenChannel)],
        RateLimiter::new(RateLimitConfig::default()),
        true,
    );

    let summary = dispatcher
        .dispatch(
            &["ops@example.com".to_string()],
            "Stock alert",
            "Flour is low",
            Priority::Normal,
        )
        .await;
    assert_eq!(summary.failed, 1);
    assert!(!summary.succeeded());

    let logs = notification_logs::Entity::find()
        .filter(notification_logs::Column::Channel.eq("broken"))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert!(logs[0].error.as_deref().unwrap().contains("no endpoint"));
}

#[tokio::test]
async fn a_disabled_dispatcher_is_silent() {
    let ctx = TestContext::new().await;
    let dispatcher = dispatcher(&ctx, 10, Duration::from_secs(60), false);

    let summary = dispatcher
        .dispatch(
            &["ops@example.com".to_string()],
            "Stock alert",
            "Flour is low",
            Priority::Normal,
        )
        .await;
    assert_eq!(summary, procurest_api::notifications::DispatchSummary::default());
    assert!(logged_recipients(&ctx, "Stock alert").await.is_empty());
}

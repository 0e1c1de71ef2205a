use async_trait::async_trait;

use super::{ChannelError, NotificationChannel, Priority};

/// The in-app inbox channel. Delivery is the `notification_logs` row the
/// dispatcher writes for every attempt, so there is nothing to do here
/// and nothing that can fail.
pub struct InAppChannel;

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn name(&self) -> &'static str {
        "in_app"
    }

    async fn send(
        &self,
        _recipient: &str,
        _title: &str,
        _body: &str,
        _priority: Priority,
    ) -> Result<(), ChannelError> {
        Ok(())
    }
}

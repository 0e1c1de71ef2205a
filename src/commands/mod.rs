use crate::{db::DbPool, errors::ServiceError, events::EventSender};
use async_trait::async_trait;
use std::sync::Arc;

/// One purchase-order workflow operation: validate the input, run the
/// writes, emit the domain events.
///
/// Each state transition in the order lifecycle is its own command object,
/// so every caller goes through the same validation and persistence path.
#[async_trait]
pub trait Command: Send + Sync {
    /// What the command hands back on success, typically the ids and
    /// totals the caller needs to report.
    type Result;

    /// Validate, persist inside a transaction where writes span tables,
    /// and publish events for the side effects.
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError>;
}

pub mod purchaseorders;

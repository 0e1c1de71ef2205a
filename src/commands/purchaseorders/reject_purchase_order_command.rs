use crate::{
    commands::Command,
    db::DbPool,
    entities::purchase_orders::{self, PurchaseOrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use sea_orm::{Set, *};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref PO_REJECTIONS: IntCounter = IntCounter::new(
        "purchase_order_rejections_total",
        "Total number of purchase orders rejected"
    )
    .expect("metric can be created");
    static ref PO_REJECTION_FAILURES: IntCounter = IntCounter::new(
        "purchase_order_rejection_failures_total",
        "Total number of failed purchase order rejections"
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RejectPurchaseOrderCommand {
    pub po_id: Uuid,
    #[validate(length(min = 1, message = "Rejector is required"))]
    pub rejected_by: String,
    #[validate(length(min = 1, max = 1000, message = "A rejection reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectPurchaseOrderResult {
    pub id: Uuid,
    pub status: String,
}

#[async_trait::async_trait]
impl Command for RejectPurchaseOrderCommand {
    type Result = RejectPurchaseOrderResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            PO_REJECTION_FAILURES.inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let db = db_pool.as_ref();

        let po = purchase_orders::Entity::find_by_id(self.po_id)
            .one(db)
            .await
            .map_err(|e| {
                PO_REJECTION_FAILURES.inc();
                error!("Failed to load purchase order {}: {}", self.po_id, e);
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| {
                PO_REJECTION_FAILURES.inc();
                ServiceError::NotFound(format!("Purchase order {} not found", self.po_id))
            })?;

        // Any in-flight order can be rejected; completed and already
        // rejected ones cannot.
        if po.status.is_terminal() {
            PO_REJECTION_FAILURES.inc();
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is {} and cannot be rejected",
                po.id, po.status
            )));
        }

        let mut active: purchase_orders::ActiveModel = po.into();
        active.status = Set(PurchaseOrderStatus::Rejected);
        active.rejected_by = Set(Some(self.rejected_by.clone()));
        active.rejection_reason = Set(Some(self.reason.clone()));
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(|e| {
            PO_REJECTION_FAILURES.inc();
            error!("Failed to reject purchase order {}: {}", self.po_id, e);
            ServiceError::db_error(e)
        })?;

        info!(
            purchase_order_id = %updated.id,
            rejected_by = %self.rejected_by,
            reason = %self.reason,
            "Purchase order rejected"
        );

        event_sender
            .send_or_log(Event::PurchaseOrderRejected {
                po_id: updated.id,
                rejected_by: self.rejected_by.clone(),
                reason: self.reason.clone(),
            })
            .await;

        PO_REJECTIONS.inc();

        Ok(RejectPurchaseOrderResult {
            id: updated.id,
            status: updated.status.to_string(),
        })
    }
}

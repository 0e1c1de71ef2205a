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
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref PO_APPROVALS: IntCounter = IntCounter::new(
        "purchase_order_approvals_total",
        "Total number of purchase orders approved"
    )
    .expect("metric can be created");
    static ref PO_APPROVAL_FAILURES: IntCounter = IntCounter::new(
        "purchase_order_approval_failures_total",
        "Total number of failed purchase order approvals"
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApprovePurchaseOrderCommand {
    pub po_id: Uuid,
    #[validate(length(min = 1, message = "Approver is required"))]
    pub approved_by: String,
    #[validate(range(min = 1, max = 3))]
    pub approval_level: i16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovePurchaseOrderResult {
    pub id: Uuid,
    /// False when the order was not in a state that allows approval;
    /// `status` then carries the state it was actually in.
    pub approved: bool,
    pub status: String,
}

#[async_trait::async_trait]
impl Command for ApprovePurchaseOrderCommand {
    type Result = ApprovePurchaseOrderResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            PO_APPROVAL_FAILURES.inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let db = db_pool.as_ref();

        let po = purchase_orders::Entity::find_by_id(self.po_id)
            .one(db)
            .await
            .map_err(|e| {
                PO_APPROVAL_FAILURES.inc();
                error!("Failed to load purchase order {}: {}", self.po_id, e);
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| {
                PO_APPROVAL_FAILURES.inc();
                ServiceError::NotFound(format!("Purchase order {} not found", self.po_id))
            })?;

        if po.status != PurchaseOrderStatus::Pending {
            warn!(
                purchase_order_id = %po.id,
                status = %po.status,
                "Approval skipped: purchase order is not pending"
            );
            return Ok(ApprovePurchaseOrderResult {
                id: po.id,
                approved: false,
                status: po.status.to_string(),
            });
        }

        let mut active: purchase_orders::ActiveModel = po.into();
        active.status = Set(PurchaseOrderStatus::Approved);
        active.approval_level = Set(Some(self.approval_level));
        active.approved_by = Set(Some(self.approved_by.clone()));
        active.approved_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(|e| {
            PO_APPROVAL_FAILURES.inc();
            error!("Failed to approve purchase order {}: {}", self.po_id, e);
            ServiceError::db_error(e)
        })?;

        info!(
            purchase_order_id = %updated.id,
            approved_by = %self.approved_by,
            approval_level = self.approval_level,
            "Purchase order approved"
        );

        event_sender
            .send_or_log(Event::PurchaseOrderApproved {
                po_id: updated.id,
                approved_by: self.approved_by.clone(),
                approval_level: self.approval_level,
            })
            .await;

        PO_APPROVALS.inc();

        Ok(ApprovePurchaseOrderResult {
            id: updated.id,
            approved: true,
            status: updated.status.to_string(),
        })
    }
}

use crate::{
    commands::purchaseorders::{
        ApprovePurchaseOrderCommand, ApprovePurchaseOrderResult, CreatePurchaseOrderCommand,
        CreatePurchaseOrderResult, RejectPurchaseOrderCommand, RejectPurchaseOrderResult,
    },
    commands::Command,
    db::DbPool,
    entities::{
        purchase_order_items,
        purchase_orders::{self, PurchaseOrderStatus},
        suppliers,
    },
    errors::ServiceError,
    events::EventSender,
    services::collaborators::SupplierDocumentSender,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Maximum order value a level-2 approver may sign off on.
fn level_two_limit() -> Decimal {
    Decimal::from(10_000_000_i64)
}

/// Maximum order value a level-3 approver may sign off on.
fn level_three_limit() -> Decimal {
    Decimal::from(5_000_000_i64)
}

/// Approval authority policy. Level 1 approvers are unrestricted; higher
/// levels carry lower spending limits, checked strictly.
///
/// Unknown levels have no authority.
pub fn can_approve(level: i16, amount: Decimal) -> bool {
    match level {
        1 => true,
        2 => amount < level_two_limit(),
        3 => amount < level_three_limit(),
        _ => false,
    }
}

/// Service for managing the purchase order lifecycle.
#[derive(Clone)]
pub struct ProcurementService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    document_sender: Option<Arc<dyn SupplierDocumentSender>>,
}

impl ProcurementService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db,
            event_sender,
            document_sender: None,
        }
    }

    /// Attaches a document sender; approved orders are then forwarded to
    /// the supplier as a side effect of approval.
    pub fn with_document_sender(mut self, sender: Arc<dyn SupplierDocumentSender>) -> Self {
        self.document_sender = Some(sender);
        self
    }

    /// Creates a new purchase order in Pending state.
    #[instrument(skip(self, command))]
    pub async fn create_purchase_order(
        &self,
        command: CreatePurchaseOrderCommand,
    ) -> Result<CreatePurchaseOrderResult, ServiceError> {
        command
            .execute(self.db.clone(), Arc::new(self.event_sender.clone()))
            .await
    }

    /// Approves a pending purchase order after checking the approver's
    /// spending authority against the order total.
    #[instrument(skip(self, command))]
    pub async fn approve_purchase_order(
        &self,
        command: ApprovePurchaseOrderCommand,
    ) -> Result<ApprovePurchaseOrderResult, ServiceError> {
        let po = self
            .get_purchase_order(&command.po_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Purchase order {} not found", command.po_id))
            })?;

        if !can_approve(command.approval_level, po.total_amount) {
            return Err(ServiceError::InvalidOperation(format!(
                "Approval level {} is not authorized for an order of {}",
                command.approval_level, po.total_amount
            )));
        }

        let result = command
            .execute(self.db.clone(), Arc::new(self.event_sender.clone()))
            .await?;

        if result.approved {
            if let Some(sender) = &self.document_sender {
                self.forward_order_document(po.id, sender.clone()).await;
            }
        }

        Ok(result)
    }

    /// Sends the approved order to the supplier in the background. The
    /// approval already committed, so a delivery failure is only logged.
    async fn forward_order_document(&self, po_id: Uuid, sender: Arc<dyn SupplierDocumentSender>) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let loaded = async {
                let po = purchase_orders::Entity::find_by_id(po_id)
                    .one(db.as_ref())
                    .await?
                    .ok_or_else(|| sea_orm::DbErr::RecordNotFound(po_id.to_string()))?;
                let items = purchase_order_items::Entity::find()
                    .filter(purchase_order_items::Column::PurchaseOrderId.eq(po_id))
                    .all(db.as_ref())
                    .await?;
                let supplier = suppliers::Entity::find_by_id(po.supplier_id)
                    .one(db.as_ref())
                    .await?
                    .ok_or_else(|| sea_orm::DbErr::RecordNotFound(po.supplier_id.to_string()))?;
                Ok::<_, sea_orm::DbErr>((po, items, supplier))
            }
            .await;

            match loaded {
                Ok((po, items, supplier)) => {
                    if let Err(e) = sender.send_order_document(&po, &items, &supplier).await {
                        warn!(po_id = %po_id, "Order document delivery failed: {}", e);
                    }
                }
                Err(e) => {
                    warn!(po_id = %po_id, "Could not load order for document delivery: {}", e);
                }
            }
        });
    }

    /// Rejects a purchase order that has not reached a terminal state.
    #[instrument(skip(self, command))]
    pub async fn reject_purchase_order(
        &self,
        command: RejectPurchaseOrderCommand,
    ) -> Result<RejectPurchaseOrderResult, ServiceError> {
        command
            .execute(self.db.clone(), Arc::new(self.event_sender.clone()))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_purchase_order(
        &self,
        po_id: &Uuid,
    ) -> Result<Option<purchase_orders::Model>, ServiceError> {
        purchase_orders::Entity::find_by_id(*po_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self))]
    pub async fn get_purchase_orders_by_supplier(
        &self,
        supplier_id: &Uuid,
    ) -> Result<Vec<purchase_orders::Model>, ServiceError> {
        purchase_orders::Entity::find()
            .filter(purchase_orders::Column::SupplierId.eq(*supplier_id))
            .order_by_desc(purchase_orders::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self))]
    pub async fn get_purchase_orders_by_status(
        &self,
        status: PurchaseOrderStatus,
    ) -> Result<Vec<purchase_orders::Model>, ServiceError> {
        purchase_orders::Entity::find()
            .filter(purchase_orders::Column::Status.eq(status))
            .order_by_asc(purchase_orders::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Orders whose expected delivery date passed before `as_of` and that
    /// have not reached a terminal state.
    #[instrument(skip(self))]
    pub async fn get_overdue_purchase_orders(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<purchase_orders::Model>, ServiceError> {
        purchase_orders::Entity::find()
            .filter(purchase_orders::Column::ExpectedDeliveryDate.lt(as_of))
            .filter(
                purchase_orders::Column::Status
                    .is_not_in([PurchaseOrderStatus::Rejected, PurchaseOrderStatus::Completed]),
            )
            .order_by_asc(purchase_orders::Column::ExpectedDeliveryDate)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

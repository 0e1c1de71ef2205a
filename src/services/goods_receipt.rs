use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        goods_receipt_items::{self, Entity as ReceiptItemEntity, QualityStatus},
        goods_receipts::{self, Entity as ReceiptEntity, GoodsReceiptStatus},
        purchase_order_items::{self, Entity as POItemEntity},
        purchase_orders::{self, Entity as POEntity, PurchaseOrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory_posting::{DbInventoryPoster, InventoryPoster},
};

/// Cumulative receipts above 110% of the ordered quantity are flagged
/// as over-receipts; they are recorded, never refused.
fn is_over_receipt(cumulative_accepted: i32, ordered: i32) -> bool {
    Decimal::from(cumulative_accepted) > Decimal::from(ordered) * dec!(1.10)
}

#[derive(Debug, Clone)]
pub struct ReceiptLineRequest {
    pub purchase_order_item_id: Uuid,
    pub quantity_received: i32,
    pub quantity_defective: i32,
    pub discrepancy_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordReceiptRequest {
    pub po_id: Uuid,
    pub received_by: String,
    pub notes: Option<String>,
    pub lines: Vec<ReceiptLineRequest>,
}

#[derive(Debug, Clone)]
pub struct ReceiptOutcome {
    pub receipt_id: Uuid,
    pub status: GoodsReceiptStatus,
    pub po_status: PurchaseOrderStatus,
    /// Items whose cumulative accepted quantity now exceeds the tolerance
    /// above the ordered quantity.
    pub over_received_items: Vec<String>,
    /// Items still short of their ordered quantity after this receipt.
    pub short_items: Vec<String>,
}

/// Reconciles incoming goods receipt events against purchase orders and
/// posts accepted quantities to inventory.
#[derive(Clone)]
pub struct GoodsReceiptService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    poster: Arc<dyn InventoryPoster>,
}

impl GoodsReceiptService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            poster: Arc::new(DbInventoryPoster),
        }
    }

    pub fn with_poster(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        poster: Arc<dyn InventoryPoster>,
    ) -> Self {
        Self {
            db,
            event_sender,
            poster,
        }
    }

    /// Records one receipt event against a purchase order.
    ///
    /// The receipt header, its lines, the inventory postings, and the
    /// purchase order status change are committed in a single transaction.
    /// Only accepted-quality quantities reach inventory; defective units
    /// are kept on the receipt line for the discrepancy trail.
    #[instrument(skip(self, request), fields(po_id = %request.po_id))]
    pub async fn record_receipt(
        &self,
        request: RecordReceiptRequest,
    ) -> Result<ReceiptOutcome, ServiceError> {
        if request.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "A goods receipt needs at least one line".to_string(),
            ));
        }
        if request.received_by.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Receiver is required".to_string(),
            ));
        }
        for line in &request.lines {
            if line.quantity_received < 0 {
                return Err(ServiceError::ValidationError(
                    "Received quantity cannot be negative".to_string(),
                ));
            }
            if line.quantity_defective < 0 || line.quantity_defective > line.quantity_received {
                return Err(ServiceError::ValidationError(format!(
                    "Defective quantity {} must be between 0 and the received quantity {}",
                    line.quantity_defective, line.quantity_received
                )));
            }
        }

        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let po = POEntity::find_by_id(request.po_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Purchase order {} not found", request.po_id))
            })?;

        if !matches!(
            po.status,
            PurchaseOrderStatus::Approved | PurchaseOrderStatus::Receiving
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is {} and cannot receive goods",
                po.id, po.status
            )));
        }

        let po_items = POItemEntity::find()
            .filter(purchase_order_items::Column::PurchaseOrderId.eq(po.id))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let items_by_id: HashMap<Uuid, &purchase_order_items::Model> =
            po_items.iter().map(|i| (i.id, i)).collect();

        for line in &request.lines {
            if !items_by_id.contains_key(&line.purchase_order_item_id) {
                return Err(ServiceError::ValidationError(format!(
                    "Line {} does not belong to purchase order {}",
                    line.purchase_order_item_id, po.id
                )));
            }
        }

        // Accepted quantities from every earlier receipt against this PO.
        let mut accepted_so_far =
            accepted_by_item_on(&txn, &po_items.iter().map(|i| i.id).collect::<Vec<_>>()).await?;

        let receipt_id = Uuid::new_v4();
        let now = Utc::now();
        let mut over_received_items = Vec::new();
        let mut prepared_lines = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            let po_item = items_by_id[&line.purchase_order_item_id];
            let accepted = line.quantity_received - line.quantity_defective;
            let cumulative = accepted_so_far
                .get(&po_item.id)
                .copied()
                .unwrap_or(0)
                + accepted;
            accepted_so_far.insert(po_item.id, cumulative);

            let mut reason = line.discrepancy_reason.clone();
            if is_over_receipt(cumulative, po_item.quantity_ordered) {
                warn!(
                    purchase_order_id = %po.id,
                    item_name = %po_item.item_name,
                    ordered = po_item.quantity_ordered,
                    cumulative_accepted = cumulative,
                    "Over-receipt beyond tolerance"
                );
                over_received_items.push(po_item.item_name.clone());
                if reason.is_none() {
                    reason = Some(format!(
                        "Over-receipt: {} accepted against {} ordered",
                        cumulative, po_item.quantity_ordered
                    ));
                }
            }

            let quality_status = if line.quantity_defective > 0 {
                QualityStatus::Defective
            } else {
                QualityStatus::Accepted
            };

            prepared_lines.push((po_item, line, accepted, quality_status, reason));
        }

        let short_items: Vec<String> = po_items
            .iter()
            .filter(|i| accepted_so_far.get(&i.id).copied().unwrap_or(0) < i.quantity_ordered)
            .map(|i| i.item_name.clone())
            .collect();
        let full = short_items.is_empty();

        let receipt_status = if full {
            GoodsReceiptStatus::Full
        } else {
            GoodsReceiptStatus::Partial
        };
        let receipt = goods_receipts::ActiveModel {
            id: Set(receipt_id),
            purchase_order_id: Set(po.id),
            received_by: Set(request.received_by.clone()),
            status: Set(receipt_status.clone()),
            notes: Set(request.notes.clone()),
            received_at: Set(now),
        };
        receipt.insert(&txn).await.map_err(|e| {
            error!("Failed to record goods receipt for PO {}: {}", po.id, e);
            ServiceError::db_error(e)
        })?;

        for (po_item, line, accepted, quality_status, reason) in prepared_lines {
            let receipt_item = goods_receipt_items::ActiveModel {
                id: Set(Uuid::new_v4()),
                goods_receipt_id: Set(receipt_id),
                purchase_order_item_id: Set(po_item.id),
                item_name: Set(po_item.item_name.clone()),
                quantity_ordered: Set(po_item.quantity_ordered),
                quantity_received: Set(line.quantity_received),
                unit_price: Set(po_item.unit_price),
                quality_status: Set(quality_status),
                quantity_defective: Set(line.quantity_defective),
                discrepancy_reason: Set(reason),
            };
            receipt_item.insert(&txn).await.map_err(|e| {
                error!("Failed to record receipt line for '{}': {}", po_item.item_name, e);
                ServiceError::db_error(e)
            })?;

            if accepted > 0 {
                let quantity_after = self
                    .poster
                    .increment_stock(&txn, &po_item.item_name, accepted)
                    .await?;
                self.poster
                    .append_audit_entry(
                        &txn,
                        &po_item.item_name,
                        accepted,
                        quantity_after,
                        "goods_receipt",
                        Some(receipt_id),
                        None,
                    )
                    .await?;
            }
        }

        let po_status = if full {
            PurchaseOrderStatus::Completed
        } else {
            PurchaseOrderStatus::Receiving
        };
        let po_id = po.id;
        let supplier_id = po.supplier_id;
        let mut active_po: purchase_orders::ActiveModel = po.into();
        active_po.status = Set(po_status.clone());
        active_po.updated_at = Set(now);
        active_po.update(&txn).await.map_err(|e| {
            error!("Failed to update purchase order {} status: {}", po_id, e);
            ServiceError::db_error(e)
        })?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            purchase_order_id = %po_id,
            receipt_id = %receipt_id,
            full = full,
            short_items = short_items.len(),
            "Goods receipt recorded"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::GoodsReceived {
                    po_id,
                    receipt_id,
                    full,
                })
                .await;
            if !full {
                sender
                    .send_or_log(Event::ShortageDetected {
                        po_id,
                        supplier_id,
                        missing_items: short_items.clone(),
                    })
                    .await;
            }
        }

        Ok(ReceiptOutcome {
            receipt_id,
            status: receipt_status,
            po_status,
            over_received_items,
            short_items,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_receipts_for_po(
        &self,
        po_id: Uuid,
    ) -> Result<Vec<goods_receipts::Model>, ServiceError> {
        ReceiptEntity::find()
            .filter(goods_receipts::Column::PurchaseOrderId.eq(po_id))
            .order_by_asc(goods_receipts::Column::ReceivedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Cumulative accepted quantity per purchase order item across all
    /// receipts recorded so far.
    #[instrument(skip(self))]
    pub async fn accepted_by_item(
        &self,
        po_id: Uuid,
    ) -> Result<HashMap<Uuid, i32>, ServiceError> {
        let po_items = POItemEntity::find()
            .filter(purchase_order_items::Column::PurchaseOrderId.eq(po_id))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        let item_ids: Vec<Uuid> = po_items.iter().map(|i| i.id).collect();

        let lines = ReceiptItemEntity::find()
            .filter(goods_receipt_items::Column::PurchaseOrderItemId.is_in(item_ids))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut accepted = HashMap::new();
        for line in lines {
            *accepted.entry(line.purchase_order_item_id).or_insert(0) +=
                line.quantity_received - line.quantity_defective;
        }
        Ok(accepted)
    }
}

pub(crate) async fn accepted_by_item_on<C: sea_orm::ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
) -> Result<HashMap<Uuid, i32>, ServiceError> {
    let lines = ReceiptItemEntity::find()
        .filter(goods_receipt_items::Column::PurchaseOrderItemId.is_in(item_ids.to_vec()))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut accepted = HashMap::new();
    for line in lines {
        *accepted.entry(line.purchase_order_item_id).or_insert(0) +=
            line.quantity_received - line.quantity_defective;
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_receipt_tolerance_is_strict() {
        // 10 ordered tolerates up to 11 accepted.
        assert!(!is_over_receipt(10, 10));
        assert!(!is_over_receipt(11, 10));
        assert!(is_over_receipt(12, 10));
    }

    #[test]
    fn over_receipt_tolerance_rounds_with_decimals() {
        // 15 ordered tolerates 16.5, so 16 passes and 17 does not.
        assert!(!is_over_receipt(16, 15));
        assert!(is_over_receipt(17, 15));
    }

    #[test]
    fn exact_coverage_is_not_an_over_receipt() {
        assert!(!is_over_receipt(100, 100));
    }
}

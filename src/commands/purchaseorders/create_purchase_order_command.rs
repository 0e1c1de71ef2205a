use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        purchase_order_items,
        purchase_orders::{self, PurchaseOrderStatus},
        suppliers,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::Decimal;
use sea_orm::{Set, *};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref PO_CREATIONS: IntCounter = IntCounter::new(
        "purchase_order_creations_total",
        "Total number of purchase orders created"
    )
    .expect("metric can be created");
    static ref PO_CREATION_FAILURES: IntCounter = IntCounter::new(
        "purchase_order_creation_failures_total",
        "Total number of failed purchase order creations"
    )
    .expect("metric can be created");
}

/// A line is capped well above any sane order; anything larger is a typo.
const MAX_LINE_QUANTITY: i32 = 100_000;

fn max_unit_price() -> Decimal {
    Decimal::from(1_000_000_000_i64)
}

fn max_order_total() -> Decimal {
    Decimal::from(1_000_000_000_000_i64)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderCommand {
    pub supplier_id: Uuid,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<PurchaseOrderItemRequest>,
    pub expected_delivery_date: DateTime<Utc>,
    #[validate(length(min = 1, message = "Creator is required"))]
    pub created_by: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PurchaseOrderItemRequest {
    #[validate(length(min = 1, message = "Item name is required"))]
    pub item_name: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePurchaseOrderResult {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub status: String,
    pub po_number: String,
    pub created_at: DateTime<Utc>,
    pub expected_delivery_date: DateTime<Utc>,
    pub total_amount: Decimal,
}

#[async_trait::async_trait]
impl Command for CreatePurchaseOrderCommand {
    type Result = CreatePurchaseOrderResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            PO_CREATION_FAILURES.inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let total_amount = self.validate_order_limits().map_err(|e| {
            PO_CREATION_FAILURES.inc();
            e
        })?;

        self.validate_supplier(db_pool.as_ref()).await.map_err(|e| {
            PO_CREATION_FAILURES.inc();
            e
        })?;

        let db = db_pool.as_ref();

        let saved_po = self.create_purchase_order(db, total_amount).await?;

        self.log_and_trigger_event(&event_sender, &saved_po).await;

        PO_CREATIONS.inc();

        Ok(CreatePurchaseOrderResult {
            id: saved_po.id,
            supplier_id: saved_po.supplier_id,
            status: saved_po.status.to_string(),
            po_number: saved_po.po_number,
            created_at: saved_po.created_at,
            expected_delivery_date: saved_po.expected_delivery_date,
            total_amount: saved_po.total_amount,
        })
    }
}

impl CreatePurchaseOrderCommand {
    /// Checks the numeric bounds the derive macro cannot express: per-line
    /// quantity and price caps, and the overflow-safe order total.
    fn validate_order_limits(&self) -> Result<Decimal, ServiceError> {
        if self.expected_delivery_date < Utc::now() + Duration::hours(1) {
            return Err(ServiceError::ValidationError(
                "Expected delivery date must be at least one hour in the future".to_string(),
            ));
        }

        let mut total = Decimal::ZERO;
        for item in &self.items {
            if item.quantity > MAX_LINE_QUANTITY {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity {} for item '{}' exceeds the per-line maximum of {}",
                    item.quantity, item.item_name, MAX_LINE_QUANTITY
                )));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price for item '{}' must be positive",
                    item.item_name
                )));
            }
            if item.unit_price > max_unit_price() {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price {} for item '{}' exceeds the maximum of {}",
                    item.unit_price,
                    item.item_name,
                    max_unit_price()
                )));
            }
            let line_total = item
                .unit_price
                .checked_mul(Decimal::from(item.quantity))
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Line total for item '{}' overflows",
                        item.item_name
                    ))
                })?;
            total = total.checked_add(line_total).ok_or_else(|| {
                ServiceError::ValidationError("Order total overflows".to_string())
            })?;
        }
        if total > max_order_total() {
            return Err(ServiceError::ValidationError(format!(
                "Order total {} exceeds the maximum of {}",
                total,
                max_order_total()
            )));
        }
        Ok(total)
    }

    async fn validate_supplier(&self, db: &DatabaseConnection) -> Result<(), ServiceError> {
        let supplier = suppliers::Entity::find_by_id(self.supplier_id)
            .one(db)
            .await
            .map_err(|e| {
                error!("Failed to look up supplier {}: {}", self.supplier_id, e);
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Supplier {} does not exist",
                    self.supplier_id
                ))
            })?;

        if !supplier.active {
            return Err(ServiceError::ValidationError(format!(
                "Supplier '{}' is inactive and cannot receive orders",
                supplier.name
            )));
        }
        Ok(())
    }

    fn generate_po_number(&self) -> String {
        format!("PO-{}", Uuid::new_v4().simple())
    }

    async fn create_purchase_order(
        &self,
        db: &DatabaseConnection,
        total_amount: Decimal,
    ) -> Result<purchase_orders::Model, ServiceError> {
        let po_number = self.generate_po_number();
        let supplier_id = self.supplier_id;
        let expected_delivery_date = self.expected_delivery_date;
        let created_by = self.created_by.clone();
        let notes = self.notes.clone();
        let items = self.items.clone();

        db.transaction::<_, purchase_orders::Model, ServiceError>(move |txn| {
            Box::pin(async move {
                let now = Utc::now();
                let new_po = purchase_orders::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    po_number: Set(po_number.clone()),
                    supplier_id: Set(supplier_id),
                    status: Set(PurchaseOrderStatus::Pending),
                    approval_level: Set(None),
                    approved_by: Set(None),
                    approved_at: Set(None),
                    rejected_by: Set(None),
                    rejection_reason: Set(None),
                    expected_delivery_date: Set(expected_delivery_date),
                    notes: Set(notes),
                    total_amount: Set(total_amount),
                    created_by: Set(created_by),
                    created_at: Set(now),
                    updated_at: Set(now),
                };

                let saved_po = new_po.insert(txn).await.map_err(|e| {
                    let msg = format!(
                        "Failed to create purchase order {} for supplier {}: {}",
                        po_number, supplier_id, e
                    );
                    error!("{}", msg);
                    ServiceError::db_error(e)
                })?;

                for item in &items {
                    let line_total = item.unit_price * Decimal::from(item.quantity);
                    let new_item = purchase_order_items::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        purchase_order_id: Set(saved_po.id),
                        item_name: Set(item.item_name.clone()),
                        quantity_ordered: Set(item.quantity),
                        unit_price: Set(item.unit_price),
                        line_total: Set(line_total),
                        created_at: Set(now),
                    };
                    new_item.insert(txn).await.map_err(|e| {
                        let msg = format!(
                            "Failed to create purchase order item for PO {} ('{}'): {}",
                            po_number, item.item_name, e
                        );
                        error!("{}", msg);
                        ServiceError::db_error(e)
                    })?;
                }

                Ok(saved_po)
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        saved_po: &purchase_orders::Model,
    ) {
        info!(
            purchase_order_id = %saved_po.id,
            po_number = %saved_po.po_number,
            supplier_id = %self.supplier_id,
            items_count = %self.items.len(),
            total_amount = %saved_po.total_amount,
            "Purchase order created"
        );

        event_sender
            .send_or_log(Event::PurchaseOrderCreated(saved_po.id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_command() -> CreatePurchaseOrderCommand {
        CreatePurchaseOrderCommand {
            supplier_id: Uuid::new_v4(),
            items: vec![PurchaseOrderItemRequest {
                item_name: "Gasket".to_string(),
                quantity: 10,
                unit_price: dec!(12.50),
            }],
            expected_delivery_date: Utc::now() + Duration::days(7),
            created_by: "buyer@example.com".to_string(),
            notes: None,
        }
    }

    #[test]
    fn totals_are_summed_across_lines() {
        let mut cmd = base_command();
        cmd.items.push(PurchaseOrderItemRequest {
            item_name: "Bolt".to_string(),
            quantity: 4,
            unit_price: dec!(3.25),
        });
        let total = cmd.validate_order_limits().unwrap();
        assert_eq!(total, dec!(138.00));
    }

    #[test]
    fn empty_item_list_fails_validation() {
        let mut cmd = base_command();
        cmd.items.clear();
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn delivery_date_in_the_past_is_rejected() {
        let mut cmd = base_command();
        cmd.expected_delivery_date = Utc::now() - Duration::hours(2);
        let err = cmd.validate_order_limits().unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn delivery_date_less_than_an_hour_out_is_rejected() {
        let mut cmd = base_command();
        cmd.expected_delivery_date = Utc::now() + Duration::minutes(30);
        assert!(cmd.validate_order_limits().is_err());
    }

    #[test]
    fn zero_unit_price_is_rejected() {
        let mut cmd = base_command();
        cmd.items[0].unit_price = Decimal::ZERO;
        let err = cmd.validate_order_limits().unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn oversized_quantity_is_rejected() {
        let mut cmd = base_command();
        cmd.items[0].quantity = MAX_LINE_QUANTITY + 1;
        assert!(cmd.validate_order_limits().is_err());
    }

    #[test]
    fn order_total_above_cap_is_rejected() {
        let mut cmd = base_command();
        cmd.items[0].quantity = 100_000;
        cmd.items[0].unit_price = dec!(20_000_000);
        assert!(cmd.validate_order_limits().is_err());
    }
}

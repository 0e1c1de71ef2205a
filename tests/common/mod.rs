#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use tokio::sync::mpsc;
use uuid::Uuid;

use procurest_api::{
    commands::purchaseorders::{
        ApprovePurchaseOrderCommand, CreatePurchaseOrderCommand, CreatePurchaseOrderResult,
        PurchaseOrderItemRequest,
    },
    commands::Command,
    db::{self, DbConfig, DbPool},
    entities::{inventory_levels, purchase_order_items, purchase_orders, suppliers},
    events::{self, Event, EventSender},
    services::suppliers::{CreateSupplierRequest, SupplierService},
};

/// Harness for exercising the workflow services against a fresh in-memory
/// SQLite database. Holding the receiver keeps the event channel open, so
/// services can emit events without a worker loop running.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub event_sender: EventSender,
    event_rx: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        // One pooled connection, or every checkout would see its own
        // empty in-memory database.
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to open in-memory test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create test schema");

        let (event_sender, event_rx) = events::event_channel(64);
        Self {
            db: Arc::new(pool),
            event_sender,
            event_rx,
        }
    }

    pub fn sender(&self) -> Arc<EventSender> {
        Arc::new(self.event_sender.clone())
    }

    /// Events emitted so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub async fn seed_supplier(&self, name: &str) -> suppliers::Model {
        SupplierService::new(self.db.clone(), Some(self.event_sender.clone()))
            .create_supplier(CreateSupplierRequest {
                name: name.to_string(),
                contact_email: Some(format!(
                    "orders@{}.example.com",
                    name.to_lowercase().replace(' ', "-")
                )),
                tax_id: None,
            })
            .await
            .expect("failed to seed supplier")
    }

    pub async fn create_po(
        &self,
        supplier_id: Uuid,
        lines: &[(&str, i32, Decimal)],
    ) -> CreatePurchaseOrderResult {
        let command = CreatePurchaseOrderCommand {
            supplier_id,
            items: lines
                .iter()
                .map(|(item_name, quantity, unit_price)| PurchaseOrderItemRequest {
                    item_name: item_name.to_string(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect(),
            expected_delivery_date: Utc::now() + Duration::days(7),
            created_by: "buyer@example.com".to_string(),
            notes: None,
        };
        command
            .execute(self.db.clone(), self.sender())
            .await
            .expect("failed to create purchase order")
    }

    pub async fn approve_po(&self, po_id: Uuid, approval_level: i16) {
        let result = ApprovePurchaseOrderCommand {
            po_id,
            approved_by: "manager@example.com".to_string(),
            approval_level,
        }
        .execute(self.db.clone(), self.sender())
        .await
        .expect("failed to approve purchase order");
        assert!(result.approved, "purchase order was not approvable");
    }

    pub async fn load_po(&self, po_id: Uuid) -> purchase_orders::Model {
        purchase_orders::Entity::find_by_id(po_id)
            .one(self.db.as_ref())
            .await
            .expect("failed to load purchase order")
            .expect("purchase order not found")
    }

    /// Lines of one purchase order, sorted by item name for stable
    /// indexing in assertions.
    pub async fn po_lines(&self, po_id: Uuid) -> Vec<purchase_order_items::Model> {
        let mut lines = purchase_order_items::Entity::find()
            .filter(purchase_order_items::Column::PurchaseOrderId.eq(po_id))
            .all(self.db.as_ref())
            .await
            .expect("failed to load purchase order lines");
        lines.sort_by(|a, b| a.item_name.cmp(&b.item_name));
        lines
    }

    pub async fn on_hand(&self, item_name: &str) -> i32 {
        procurest_api::services::inventory_posting::current_level(self.db.as_ref(), item_name)
            .await
            .expect("failed to read inventory level")
    }

    /// Forces the on-hand level for an item, creating the row if needed.
    pub async fn set_stock(&self, item_name: &str, quantity: i32) {
        let existing = inventory_levels::Entity::find()
            .filter(inventory_levels::Column::ItemName.eq(item_name))
            .one(self.db.as_ref())
            .await
            .expect("failed to read inventory level");
        match existing {
            Some(level) => {
                let mut active: inventory_levels::ActiveModel = level.into();
                active.quantity_on_hand = Set(quantity);
                active.updated_at = Set(Utc::now());
                active
                    .update(self.db.as_ref())
                    .await
                    .expect("failed to update inventory level");
            }
            None => {
                let level = inventory_levels::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    item_name: Set(item_name.to_string()),
                    quantity_on_hand: Set(quantity),
                    updated_at: Set(Utc::now()),
                };
                level
                    .insert(self.db.as_ref())
                    .await
                    .expect("failed to seed inventory level");
            }
        }
    }
}

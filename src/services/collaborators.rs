use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{
    entities::{purchase_order_items, purchase_orders, suppliers},
    errors::ServiceError,
    services::{inventory_posting, replenishment::LowStockItem},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Hands an approved purchase order off to whatever delivers documents
/// to suppliers (email gateway, EDI bridge). Implementations own the
/// rendering; callers just pass the records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupplierDocumentSender: Send + Sync {
    async fn send_order_document(
        &self,
        purchase_order: &purchase_orders::Model,
        items: &[purchase_order_items::Model],
        supplier: &suppliers::Model,
    ) -> Result<(), ServiceError>;
}

/// Enriches bare low-stock item names with the catalog data a reorder
/// needs (category for supplier fallback, unit price for order lines).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LowStockCatalog: Send + Sync {
    async fn describe(&self, item_names: &[String]) -> Result<Vec<LowStockItem>, ServiceError>;
}

/// Builds reorder candidates from purchase history: the unit price comes
/// from the most recent order line for the item, the stock level from the
/// current on-hand record. Items with no purchase history are dropped,
/// since there is nothing to price a reorder line with.
pub struct PurchaseHistoryCatalog {
    db: Arc<DatabaseConnection>,
}

impl PurchaseHistoryCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LowStockCatalog for PurchaseHistoryCatalog {
    async fn describe(&self, item_names: &[String]) -> Result<Vec<LowStockItem>, ServiceError> {
        let mut items = Vec::with_capacity(item_names.len());
        for name in item_names {
            let last_line = purchase_order_items::Entity::find()
                .filter(purchase_order_items::Column::ItemName.eq(name.as_str()))
                .order_by_desc(purchase_order_items::Column::CreatedAt)
                .one(self.db.as_ref())
                .await
                .map_err(ServiceError::DatabaseError)?;
            let Some(last_line) = last_line else {
                warn!(item = %name, "No purchase history; reorder line skipped");
                continue;
            };

            let current_stock = inventory_posting::current_level(self.db.as_ref(), name).await?;
            items.push(LowStockItem {
                // Stock keys already carry the size variant in the name.
                product_name: name.clone(),
                size: None,
                category_name: String::new(),
                current_stock,
                unit_price: last_line.unit_price,
            });
        }
        Ok(items)
    }
}

/// Posts the purchase order as JSON to a configured document endpoint.
pub struct HttpDocumentSender {
    client: reqwest::Client,
    endpoint_url: String,
}

impl HttpDocumentSender {
    pub fn new(endpoint_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint_url,
        }
    }
}

#[async_trait]
impl SupplierDocumentSender for HttpDocumentSender {
    #[instrument(skip(self, purchase_order, items, supplier), fields(po_number = %purchase_order.po_number))]
    async fn send_order_document(
        &self,
        purchase_order: &purchase_orders::Model,
        items: &[purchase_order_items::Model],
        supplier: &suppliers::Model,
    ) -> Result<(), ServiceError> {
        let payload = json!({
            "po_number": purchase_order.po_number,
            "supplier": {
                "id": supplier.id,
                "name": supplier.name,
                "contact_email": supplier.contact_email,
            },
            "expected_delivery_date": purchase_order.expected_delivery_date,
            "total_amount": purchase_order.total_amount,
            "notes": purchase_order.notes,
            "lines": items
                .iter()
                .map(|item| {
                    json!({
                        "item_name": item.item_name,
                        "quantity": item.quantity_ordered,
                        "unit_price": item.unit_price,
                        "line_total": item.line_total,
                    })
                })
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(&self.endpoint_url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::DeliveryError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::DeliveryError(format!(
                "document endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        debug!(supplier = %supplier.name, "Purchase order document sent");
        Ok(())
    }
}

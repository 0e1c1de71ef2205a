use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    commands::purchaseorders::{CreatePurchaseOrderCommand, PurchaseOrderItemRequest},
    commands::Command,
    config::AppConfig,
    entities::{
        purchase_order_items::{self, Entity as POItemEntity},
        purchase_orders::{self, Entity as POEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::supplier_mapping::SupplierMappingService,
};

#[derive(Debug, Clone)]
pub struct ReplenishmentSettings {
    pub target_stock_level: i32,
    pub floor_quantity: i32,
    pub dedup_window_days: i64,
    pub lead_time_days: i64,
}

impl Default for ReplenishmentSettings {
    fn default() -> Self {
        Self {
            target_stock_level: 20,
            floor_quantity: 15,
            dedup_window_days: 1,
            lead_time_days: 7,
        }
    }
}

impl From<&AppConfig> for ReplenishmentSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            target_stock_level: config.target_stock_level,
            floor_quantity: config.reorder_floor_quantity,
            dedup_window_days: config.replenishment_dedup_window_days,
            lead_time_days: config.replenishment_lead_time_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LowStockItem {
    pub product_name: String,
    pub size: Option<String>,
    pub category_name: String,
    pub current_stock: i32,
    pub unit_price: Decimal,
}

impl LowStockItem {
    /// Ordering key and PO line name; the size variant is part of the
    /// identity so "Flour (5kg)" and "Flour (25kg)" reorder independently.
    pub fn display_name(&self) -> String {
        match &self.size {
            Some(size) => format!("{} ({})", self.product_name, size),
            None => self.product_name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplenishmentOutcome {
    /// One purchase order per supplier that had orderable items.
    pub orders_by_supplier: HashMap<Uuid, Uuid>,
    /// Items not ordered this run, with no supplier or inside the dedup
    /// window, by display name.
    pub skipped_items: Vec<String>,
}

fn reorder_quantity(target_level: i32, current_stock: i32, floor_quantity: i32) -> i32 {
    (target_level - current_stock).max(floor_quantity)
}

/// Turns low-stock scan results into supplier purchase orders: resolve a
/// supplier per item, drop items ordered recently, group the rest into
/// one order per supplier.
#[derive(Clone)]
pub struct ReplenishmentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    mapper: Arc<SupplierMappingService>,
    settings: ReplenishmentSettings,
}

impl ReplenishmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        mapper: Arc<SupplierMappingService>,
        settings: ReplenishmentSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            mapper,
            settings,
        }
    }

    #[instrument(skip(self, low_stock_items), fields(candidates = low_stock_items.len()))]
    pub async fn create_orders_from_low_stock(
        &self,
        low_stock_items: Vec<LowStockItem>,
        created_by: &str,
    ) -> Result<ReplenishmentOutcome, ServiceError> {
        let mut outcome = ReplenishmentOutcome::default();
        if low_stock_items.is_empty() {
            return Ok(outcome);
        }

        let mut resolved: Vec<(Uuid, LowStockItem)> = Vec::new();
        for item in low_stock_items {
            match self
                .mapper
                .resolve(&item.product_name, &item.category_name)
                .await
            {
                Some(supplier_id) => resolved.push((supplier_id, item)),
                None => {
                    warn!(
                        product = %item.product_name,
                        category = %item.category_name,
                        "No supplier mapping; item skipped"
                    );
                    outcome.skipped_items.push(item.display_name());
                }
            }
        }

        let recently_ordered = self
            .recently_ordered_names(resolved.iter().map(|(_, i)| i.display_name()).collect())
            .await?;

        let mut groups: HashMap<Uuid, Vec<LowStockItem>> = HashMap::new();
        for (supplier_id, item) in resolved {
            let name = item.display_name();
            if recently_ordered.contains(&name) {
                info!(item = %name, "Already ordered within the dedup window; skipped");
                outcome.skipped_items.push(name);
                continue;
            }
            groups.entry(supplier_id).or_default().push(item);
        }

        let expected_delivery = Utc::now() + Duration::days(self.settings.lead_time_days);

        for (supplier_id, items) in groups {
            let mut lines = Vec::with_capacity(items.len());
            let mut note_parts = Vec::with_capacity(items.len());
            for item in &items {
                let quantity = reorder_quantity(
                    self.settings.target_stock_level,
                    item.current_stock,
                    self.settings.floor_quantity,
                );
                note_parts.push(format!("{} x{}", item.display_name(), quantity));
                lines.push(PurchaseOrderItemRequest {
                    item_name: item.display_name(),
                    quantity,
                    unit_price: item.unit_price,
                });
            }

            let command = CreatePurchaseOrderCommand {
                supplier_id,
                items: lines,
                expected_delivery_date: expected_delivery,
                created_by: created_by.to_string(),
                notes: Some(format!(
                    "Auto-replenishment: {}; expected delivery {}",
                    note_parts.join(", "),
                    expected_delivery.format("%Y-%m-%d")
                )),
            };

            match command
                .execute(self.db.clone(), Arc::new(self.event_sender.clone()))
                .await
            {
                Ok(result) => {
                    info!(
                        supplier_id = %supplier_id,
                        purchase_order_id = %result.id,
                        items = items.len(),
                        "Replenishment order created"
                    );
                    outcome.orders_by_supplier.insert(supplier_id, result.id);
                }
                Err(e) => {
                    // One supplier failing must not abandon the rest of
                    // the run; the items surface as skipped.
                    error!(
                        supplier_id = %supplier_id,
                        "Replenishment order failed: {}", e
                    );
                    outcome
                        .skipped_items
                        .extend(items.iter().map(|i| i.display_name()));
                }
            }
        }

        if !outcome.orders_by_supplier.is_empty() {
            self.event_sender
                .send_or_log(Event::LowStockOrdersCreated {
                    po_ids: outcome.orders_by_supplier.values().copied().collect(),
                    skipped_items: outcome.skipped_items.clone(),
                })
                .await;
        }

        Ok(outcome)
    }

    /// Item names already on a purchase order created inside the dedup
    /// window.
    async fn recently_ordered_names(
        &self,
        candidate_names: Vec<String>,
    ) -> Result<std::collections::HashSet<String>, ServiceError> {
        if candidate_names.is_empty() {
            return Ok(Default::default());
        }
        let cutoff = Utc::now() - Duration::days(self.settings.dedup_window_days);

        let recent_po_ids: Vec<Uuid> = POEntity::find()
            .filter(purchase_orders::Column::CreatedAt.gte(cutoff))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?
            .into_iter()
            .map(|po| po.id)
            .collect();
        if recent_po_ids.is_empty() {
            return Ok(Default::default());
        }

        let items = POItemEntity::find()
            .filter(purchase_order_items::Column::PurchaseOrderId.is_in(recent_po_ids))
            .filter(purchase_order_items::Column::ItemName.is_in(candidate_names))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(items.into_iter().map(|i| i.item_name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[rstest::rstest]
    #[case::tops_up_to_target(20, 2, 15, 18)]
    #[case::floor_wins_near_target(20, 10, 15, 15)]
    #[case::floor_wins_at_target(20, 19, 15, 15)]
    #[case::empty_shelf_orders_the_full_target(20, 0, 15, 20)]
    fn reorder_quantity_tops_up_but_respects_the_floor(
        #[case] target: i32,
        #[case] stock: i32,
        #[case] floor: i32,
        #[case] expected: i32,
    ) {
        assert_eq!(reorder_quantity(target, stock, floor), expected);
    }

    #[test]
    fn sized_items_fold_size_into_the_name() {
        let item = LowStockItem {
            product_name: "Flour".to_string(),
            size: Some("25kg".to_string()),
            category_name: "Baking".to_string(),
            current_stock: 3,
            unit_price: dec!(18.00),
        };
        assert_eq!(item.display_name(), "Flour (25kg)");
    }

    #[test]
    fn unsized_items_use_the_bare_name() {
        let item = LowStockItem {
            product_name: "Olive Oil".to_string(),
            size: None,
            category_name: "Oils".to_string(),
            current_stock: 0,
            unit_price: dec!(9.50),
        };
        assert_eq!(item.display_name(), "Olive Oil");
    }

    #[test]
    fn default_settings_match_policy() {
        let settings = ReplenishmentSettings::default();
        assert_eq!(settings.target_stock_level, 20);
        assert_eq!(settings.floor_quantity, 15);
        assert_eq!(settings.dedup_window_days, 1);
        assert_eq!(settings.lead_time_days, 7);
    }
}

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestContext;
use procurest_api::{
    entities::purchase_orders::PurchaseOrderStatus,
    errors::ServiceError,
    events::Event,
    services::replenishment::{
        LowStockItem, ReplenishmentService, ReplenishmentSettings,
    },
    services::supplier_mapping::{SupplierMappingService, SupplierMappingSource},
};

/// In-memory mapping source; the JSON file source is exercised by the
/// unit tests next to it.
struct FixedMappingSource {
    entries: HashMap<String, Uuid>,
}

#[async_trait]
impl SupplierMappingSource for FixedMappingSource {
    async fn load(&self) -> Result<HashMap<String, Uuid>, ServiceError> {
        Ok(self.entries.clone())
    }
}

fn service_with_mapping(
    ctx: &TestContext,
    entries: &[(&str, Uuid)],
) -> ReplenishmentService {
    let source = FixedMappingSource {
        entries: entries
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect(),
    };
    let mapper = Arc::new(SupplierMappingService::new(
        Arc::new(source),
        Duration::from_secs(60),
    ));
    ReplenishmentService::new(
        ctx.db.clone(),
        ctx.event_sender.clone(),
        mapper,
        ReplenishmentSettings::default(),
    )
}

fn low(product_name: &str, category_name: &str, current_stock: i32) -> LowStockItem {
    LowStockItem {
        product_name: product_name.to_string(),
        size: None,
        category_name: category_name.to_string(),
        current_stock,
        unit_price: dec!(10),
    }
}

#[tokio::test]
async fn low_stock_items_group_into_one_order_per_supplier() {
    let mut ctx = TestContext::new().await;
    let mills = ctx.seed_supplier("Acme Mills").await;
    let harbor = ctx.seed_supplier("Harbor Foods").await;
    ctx.drain_events();

    let service = service_with_mapping(
        &ctx,
        &[
            ("flour (25kg)", mills.id),
            ("sugar (10kg)", mills.id),
            ("oils", harbor.id),
        ],
    );

    let outcome = service
        .create_orders_from_low_stock(
            vec![
                low("Flour (25kg)", "Baking", 2),
                low("Sugar (10kg)", "Baking", 10),
                // Resolved through the category fallback.
                low("Olive Oil (5l)", "Oils", 0),
                // No product or category mapping at all.
                low("Saffron", "Spices", 1),
            ],
            "scheduler",
        )
        .await
        .unwrap();

    assert_eq!(outcome.orders_by_supplier.len(), 2);
    assert_eq!(outcome.skipped_items, vec!["Saffron".to_string()]);

    let mills_po_id = outcome.orders_by_supplier[&mills.id];
    let mills_po = ctx.load_po(mills_po_id).await;
    assert_eq!(mills_po.status, PurchaseOrderStatus::Pending);
    assert_eq!(mills_po.created_by, "scheduler");

    // Top up to target 20, never below the floor of 15: 2 on hand needs
    // 18, 10 on hand would need 10 but orders the floor.
    let mills_lines = ctx.po_lines(mills_po_id).await;
    assert_eq!(mills_lines.len(), 2);
    assert_eq!(mills_lines[0].item_name, "Flour (25kg)");
    assert_eq!(mills_lines[0].quantity_ordered, 18);
    assert_eq!(mills_lines[1].item_name, "Sugar (10kg)");
    assert_eq!(mills_lines[1].quantity_ordered, 15);

    let harbor_lines = ctx.po_lines(outcome.orders_by_supplier[&harbor.id]).await;
    assert_eq!(harbor_lines.len(), 1);
    assert_eq!(harbor_lines[0].item_name, "Olive Oil (5l)");
    assert_eq!(harbor_lines[0].quantity_ordered, 20);

    let events = ctx.drain_events();
    let created_event = events
        .iter()
        .find_map(|e| match e {
            Event::LowStockOrdersCreated {
                po_ids,
                skipped_items,
            } => Some((po_ids.clone(), skipped_items.clone())),
            _ => None,
        })
        .expect("no replenishment event emitted");
    assert_eq!(created_event.0.len(), 2);
    assert_eq!(created_event.1, vec!["Saffron".to_string()]);
}

#[tokio::test]
async fn items_ordered_inside_the_dedup_window_are_not_reordered() {
    let ctx = TestContext::new().await;
    let mills = ctx.seed_supplier("Acme Mills").await;

    let service = service_with_mapping(&ctx, &[("flour (25kg)", mills.id)]);

    let first = service
        .create_orders_from_low_stock(vec![low("Flour (25kg)", "Baking", 2)], "scheduler")
        .await
        .unwrap();
    assert_eq!(first.orders_by_supplier.len(), 1);

    // The stock has not come in yet, so the next scan sees the same item.
    let second = service
        .create_orders_from_low_stock(vec![low("Flour (25kg)", "Baking", 2)], "scheduler")
        .await
        .unwrap();
    assert!(second.orders_by_supplier.is_empty());
    assert_eq!(second.skipped_items, vec!["Flour (25kg)".to_string()]);
}

#[tokio::test]
async fn a_run_with_nothing_mapped_creates_no_orders() {
    let ctx = TestContext::new().await;
    let service = service_with_mapping(&ctx, &[]);

    let outcome = service
        .create_orders_from_low_stock(
            vec![low("Widget", "Hardware", 0), low("Gadget", "Hardware", 3)],
            "scheduler",
        )
        .await
        .unwrap();

    assert!(outcome.orders_by_supplier.is_empty());
    assert_eq!(outcome.skipped_items.len(), 2);
}

#[tokio::test]
async fn an_empty_scan_is_a_no_op() {
    let ctx = TestContext::new().await;
    let mills = ctx.seed_supplier("Acme Mills").await;
    let service = service_with_mapping(&ctx, &[("flour (25kg)", mills.id)]);

    let outcome = service
        .create_orders_from_low_stock(Vec::new(), "scheduler")
        .await
        .unwrap();
    assert!(outcome.orders_by_supplier.is_empty());
    assert!(outcome.skipped_items.is_empty());
}

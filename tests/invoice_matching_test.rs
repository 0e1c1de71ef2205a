mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestContext;
use procurest_api::{
    entities::invoices::InvoiceMatchStatus,
    errors::ServiceError,
    events::Event,
    services::goods_receipt::{GoodsReceiptService, ReceiptLineRequest, RecordReceiptRequest},
    services::invoice_matching::{InvoiceLineRequest, InvoiceMatchingService},
};

const TOLERANCE: f64 = 0.02;

/// Drives a purchase order to Completed: Flour 10 @ 1000 and Sugar 5 @
/// 2000, fully received in one delivery. Returns (po_id, supplier_id).
async fn completed_order(ctx: &TestContext) -> (Uuid, Uuid) {
    let supplier = ctx.seed_supplier("Acme Mills").await;
    let created = ctx
        .create_po(
            supplier.id,
            &[
                ("Flour (25kg)", 10, dec!(1000)),
                ("Sugar (10kg)", 5, dec!(2000)),
            ],
        )
        .await;
    ctx.approve_po(created.id, 2).await;

    let lines = ctx.po_lines(created.id).await;
    let service = GoodsReceiptService::new(ctx.db.clone(), None);
    service
        .record_receipt(RecordReceiptRequest {
            po_id: created.id,
            received_by: "warehouse@example.com".to_string(),
            notes: None,
            lines: lines
                .iter()
                .map(|line| ReceiptLineRequest {
                    purchase_order_item_id: line.id,
                    quantity_received: line.quantity_ordered,
                    quantity_defective: 0,
                    discrepancy_reason: None,
                })
                .collect(),
        })
        .await
        .expect("failed to receive order in full");

    (created.id, supplier.id)
}

fn billed(item_name: &str, quantity: i32, unit_price: rust_decimal::Decimal) -> InvoiceLineRequest {
    InvoiceLineRequest {
        item_name: item_name.to_string(),
        quantity,
        unit_price,
    }
}

#[tokio::test]
async fn invoice_matching_the_order_exactly_auto_approves() {
    let mut ctx = TestContext::new().await;
    let (po_id, supplier_id) = completed_order(&ctx).await;
    ctx.drain_events();

    let service =
        InvoiceMatchingService::new(ctx.db.clone(), Some(ctx.event_sender.clone()), TOLERANCE);
    let outcome = service
        .match_invoice(
            po_id,
            supplier_id,
            "INV-1001".to_string(),
            Utc::now().date_naive(),
            vec![
                billed("Flour (25kg)", 10, dec!(1000)),
                billed("Sugar (10kg)", 5, dec!(2000)),
            ],
        )
        .await
        .unwrap();

    assert!(outcome.matched);
    assert_eq!(outcome.match_status, InvoiceMatchStatus::Matched);
    assert_eq!(outcome.total_amount, dec!(20000));
    assert!(outcome.discrepancies.is_empty());

    let stored = service.get_invoice(outcome.invoice_id).await.unwrap().unwrap();
    assert!(stored.matched);
    assert!(stored.match_note.is_none());

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::InvoiceMatched(id) if *id == outcome.invoice_id)));
}

#[tokio::test]
async fn price_within_tolerance_still_matches() {
    let ctx = TestContext::new().await;
    let (po_id, supplier_id) = completed_order(&ctx).await;

    // 1.5% above the ordered price, inside the 2% band on every
    // comparison including the aggregate total.
    let service = InvoiceMatchingService::new(ctx.db.clone(), None, TOLERANCE);
    let outcome = service
        .match_invoice(
            po_id,
            supplier_id,
            "INV-1002".to_string(),
            Utc::now().date_naive(),
            vec![
                billed("Flour (25kg)", 10, dec!(1015)),
                billed("Sugar (10kg)", 5, dec!(2000)),
            ],
        )
        .await
        .unwrap();

    assert!(outcome.matched);
    assert!(outcome.discrepancies.is_empty());
}

#[tokio::test]
async fn large_price_deviation_is_flagged_and_can_be_resolved() {
    let mut ctx = TestContext::new().await;
    let (po_id, supplier_id) = completed_order(&ctx).await;
    ctx.drain_events();

    let service =
        InvoiceMatchingService::new(ctx.db.clone(), Some(ctx.event_sender.clone()), TOLERANCE);
    let outcome = service
        .match_invoice(
            po_id,
            supplier_id,
            "INV-1003".to_string(),
            Utc::now().date_naive(),
            vec![
                billed("Flour (25kg)", 10, dec!(1500)),
                billed("Sugar (10kg)", 5, dec!(2000)),
            ],
        )
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert_eq!(outcome.match_status, InvoiceMatchStatus::Mismatched);
    assert!(outcome
        .discrepancies
        .iter()
        .any(|d| d.contains("billed at 1500")));
    assert!(outcome
        .discrepancies
        .iter()
        .any(|d| d.contains("invoice total")));

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::InvoiceMismatched { invoice_id, .. } if *invoice_id == outcome.invoice_id)));

    let unresolved = service.list_unresolved_mismatches().await.unwrap();
    assert_eq!(unresolved.len(), 1);

    let resolved = service
        .resolve_discrepancy(
            outcome.invoice_id,
            "supplier issued credit note CN-88".to_string(),
        )
        .await
        .unwrap();
    assert!(resolved.matched);
    assert_eq!(
        resolved.match_note.as_deref(),
        Some("supplier issued credit note CN-88")
    );
    assert!(service.list_unresolved_mismatches().await.unwrap().is_empty());

    // A second resolution has nothing left to clear.
    let err = service
        .resolve_discrepancy(outcome.invoice_id, "again".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn billing_an_over_delivery_is_flagged_against_the_order() {
    let ctx = TestContext::new().await;
    let supplier = ctx.seed_supplier("Harbor Foods").await;
    let created = ctx
        .create_po(supplier.id, &[("Olive Oil (5l)", 10, dec!(45))])
        .await;
    ctx.approve_po(created.id, 1).await;
    let lines = ctx.po_lines(created.id).await;

    // The supplier ships 12 against 10 ordered; the receipt commits and
    // completes the order.
    GoodsReceiptService::new(ctx.db.clone(), None)
        .record_receipt(RecordReceiptRequest {
            po_id: created.id,
            received_by: "warehouse@example.com".to_string(),
            notes: None,
            lines: vec![ReceiptLineRequest {
                purchase_order_item_id: lines[0].id,
                quantity_received: 12,
                quantity_defective: 0,
                discrepancy_reason: None,
            }],
        })
        .await
        .unwrap();

    // Billing the 12 delivered units agrees with the receipt but not
    // with the order, so the invoice still needs a human.
    let service = InvoiceMatchingService::new(ctx.db.clone(), None, TOLERANCE);
    let outcome = service
        .match_invoice(
            created.id,
            supplier.id,
            "INV-2001".to_string(),
            Utc::now().date_naive(),
            vec![billed("Olive Oil (5l)", 12, dec!(45))],
        )
        .await
        .unwrap();

    assert!(!outcome.matched);
    assert!(outcome
        .discrepancies
        .iter()
        .any(|d| d.contains("billed 12 vs ordered 10")));
    assert!(!outcome
        .discrepancies
        .iter()
        .any(|d| d.contains("vs received")));
}

#[tokio::test]
async fn invoices_only_match_against_completed_orders() {
    let ctx = TestContext::new().await;
    let supplier = ctx.seed_supplier("Acme Mills").await;
    let created = ctx
        .create_po(supplier.id, &[("Flour (25kg)", 10, dec!(1000))])
        .await;
    ctx.approve_po(created.id, 1).await;

    let service = InvoiceMatchingService::new(ctx.db.clone(), None, TOLERANCE);
    let err = service
        .match_invoice(
            created.id,
            supplier.id,
            "INV-3001".to_string(),
            Utc::now().date_naive(),
            vec![billed("Flour (25kg)", 10, dec!(1000))],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
}

#[tokio::test]
async fn wrong_supplier_on_the_invoice_is_refused() {
    let ctx = TestContext::new().await;
    let (po_id, _) = completed_order(&ctx).await;
    let other = ctx.seed_supplier("Harbor Foods").await;

    let service = InvoiceMatchingService::new(ctx.db.clone(), None, TOLERANCE);
    let err = service
        .match_invoice(
            po_id,
            other.id,
            "INV-3002".to_string(),
            Utc::now().date_naive(),
            vec![billed("Flour (25kg)", 10, dec!(1000))],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

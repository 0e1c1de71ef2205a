use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
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
        invoice_line_items,
        invoices::{self, Entity as InvoiceEntity, InvoiceMatchStatus},
        purchase_order_items::{self, Entity as POItemEntity},
        purchase_orders::{Entity as POEntity, PurchaseOrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::goods_receipt::accepted_by_item_on,
};

/// True when `actual` lies within `tolerance` (a fraction) of `expected`.
/// An expected value of zero only matches an actual of zero.
fn within_tolerance(actual: Decimal, expected: Decimal, tolerance: Decimal) -> bool {
    if expected.is_zero() {
        return actual.is_zero();
    }
    (actual - expected).abs() <= expected.abs() * tolerance
}

#[derive(Debug, Clone)]
pub struct InvoiceLineRequest {
    pub item_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct InvoiceMatchOutcome {
    pub invoice_id: Uuid,
    pub match_status: InvoiceMatchStatus,
    pub matched: bool,
    pub total_amount: Decimal,
    pub discrepancies: Vec<String>,
}

/// Matches supplier invoices against purchase orders and their receipts.
///
/// An invoice is compared three ways for every line it shares with the
/// order: quantity ordered, cumulative accepted quantity received, and
/// quantity billed. Amounts are compared in aggregate. Everything within
/// tolerance auto-approves; anything else waits for manual resolution.
#[derive(Clone)]
pub struct InvoiceMatchingService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    tolerance: Decimal,
}

impl InvoiceMatchingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        tolerance: f64,
    ) -> Self {
        Self {
            db,
            event_sender,
            tolerance: Decimal::from_f64_retain(tolerance).unwrap_or_else(|| Decimal::new(2, 2)),
        }
    }

    /// Records a supplier invoice against a completed purchase order and
    /// runs the three-way match.
    #[instrument(skip(self, lines), fields(po_id = %po_id, invoice_number = %invoice_number))]
    pub async fn match_invoice(
        &self,
        po_id: Uuid,
        supplier_id: Uuid,
        invoice_number: String,
        invoice_date: NaiveDate,
        lines: Vec<InvoiceLineRequest>,
    ) -> Result<InvoiceMatchOutcome, ServiceError> {
        if invoice_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Invoice number is required".to_string(),
            ));
        }
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "An invoice needs at least one line".to_string(),
            ));
        }
        for line in &lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Billed quantity for '{}' must be positive",
                    line.item_name
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Billed unit price for '{}' cannot be negative",
                    line.item_name
                )));
            }
        }

        let db = &*self.db;

        let po = POEntity::find_by_id(po_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))?;

        if po.status != PurchaseOrderStatus::Completed {
            return Err(ServiceError::InvalidStatus(format!(
                "Purchase order {} is {}; invoices match only against completed orders",
                po.id, po.status
            )));
        }
        if po.supplier_id != supplier_id {
            return Err(ServiceError::ValidationError(format!(
                "Invoice supplier {} does not match the order's supplier {}",
                supplier_id, po.supplier_id
            )));
        }

        let po_items = POItemEntity::find()
            .filter(purchase_order_items::Column::PurchaseOrderId.eq(po.id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let accepted =
            accepted_by_item_on(db, &po_items.iter().map(|i| i.id).collect::<Vec<_>>()).await?;

        // Billed totals use the supplier's own figures, whatever was
        // ordered or received.
        let total_amount: Decimal = lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();

        let by_name: HashMap<String, &purchase_order_items::Model> = po_items
            .iter()
            .map(|i| (i.item_name.to_lowercase(), i))
            .collect();

        let mut discrepancies = Vec::new();
        let mut associations: Vec<Option<Uuid>> = Vec::with_capacity(lines.len());

        for line in &lines {
            match by_name.get(&line.item_name.to_lowercase()) {
                Some(po_item) => {
                    associations.push(Some(po_item.id));
                    let billed_qty = Decimal::from(line.quantity);
                    let ordered_qty = Decimal::from(po_item.quantity_ordered);
                    let received_qty =
                        Decimal::from(accepted.get(&po_item.id).copied().unwrap_or(0));

                    if !within_tolerance(billed_qty, ordered_qty, self.tolerance) {
                        discrepancies.push(format!(
                            "'{}': billed {} vs ordered {}",
                            po_item.item_name, line.quantity, po_item.quantity_ordered
                        ));
                    }
                    if !within_tolerance(billed_qty, received_qty, self.tolerance) {
                        discrepancies.push(format!(
                            "'{}': billed {} vs received {}",
                            po_item.item_name, line.quantity, received_qty
                        ));
                    }
                    if !within_tolerance(line.unit_price, po_item.unit_price, self.tolerance) {
                        discrepancies.push(format!(
                            "'{}': billed at {} vs ordered at {}",
                            po_item.item_name, line.unit_price, po_item.unit_price
                        ));
                    }
                }
                None => associations.push(None),
            }
        }

        if !within_tolerance(total_amount, po.total_amount, self.tolerance) {
            discrepancies.push(format!(
                "invoice total {} vs order total {}",
                total_amount, po.total_amount
            ));
        }

        let matched = discrepancies.is_empty();
        let match_status = if matched {
            InvoiceMatchStatus::Matched
        } else {
            InvoiceMatchStatus::Mismatched
        };
        let match_note = if matched {
            None
        } else {
            Some(discrepancies.join("; "))
        };

        let invoice_id = Uuid::new_v4();
        let now = Utc::now();
        let status_for_row = match_status.clone();
        let note_for_row = match_note.clone();
        let lines_for_row = lines.clone();
        let associations_for_row = associations.clone();

        db.transaction::<_, (), ServiceError>(move |txn| {
            Box::pin(async move {
                let invoice = invoices::ActiveModel {
                    id: Set(invoice_id),
                    purchase_order_id: Set(Some(po_id)),
                    supplier_id: Set(supplier_id),
                    invoice_number: Set(invoice_number.clone()),
                    total_amount: Set(total_amount),
                    invoice_date: Set(invoice_date),
                    match_status: Set(status_for_row),
                    matched: Set(matched),
                    match_note: Set(note_for_row),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                invoice.insert(txn).await.map_err(|e| {
                    error!("Failed to record invoice {}: {}", invoice_number, e);
                    ServiceError::db_error(e)
                })?;

                for (line, association) in lines_for_row.iter().zip(associations_for_row) {
                    let row = invoice_line_items::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        invoice_id: Set(invoice_id),
                        purchase_order_item_id: Set(association),
                        item_name: Set(line.item_name.clone()),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        line_total: Set(line.unit_price * Decimal::from(line.quantity)),
                    };
                    row.insert(txn).await.map_err(|e| {
                        error!("Failed to record invoice line '{}': {}", line.item_name, e);
                        ServiceError::db_error(e)
                    })?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| match e {
            sea_orm::TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            sea_orm::TransactionError::Transaction(service_err) => service_err,
        })?;

        if matched {
            info!(invoice_id = %invoice_id, purchase_order_id = %po_id, "Invoice matched");
            if let Some(sender) = &self.event_sender {
                sender.send_or_log(Event::InvoiceMatched(invoice_id)).await;
            }
        } else {
            warn!(
                invoice_id = %invoice_id,
                purchase_order_id = %po_id,
                discrepancies = discrepancies.len(),
                "Invoice mismatched"
            );
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::InvoiceMismatched {
                        invoice_id,
                        note: discrepancies.join("; "),
                    })
                    .await;
            }
        }

        Ok(InvoiceMatchOutcome {
            invoice_id,
            match_status,
            matched,
            total_amount,
            discrepancies,
        })
    }

    /// Manually clears a mismatched invoice, keeping the reviewer's note.
    #[instrument(skip(self))]
    pub async fn resolve_discrepancy(
        &self,
        invoice_id: Uuid,
        note: String,
    ) -> Result<invoices::Model, ServiceError> {
        if note.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A resolution note is required".to_string(),
            ));
        }

        let invoice = InvoiceEntity::find_by_id(invoice_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

        if invoice.matched {
            return Err(ServiceError::InvalidOperation(format!(
                "Invoice {} is already matched",
                invoice_id
            )));
        }

        let mut active: invoices::ActiveModel = invoice.into();
        active.matched = Set(true);
        active.match_note = Set(Some(note.clone()));
        active.updated_at = Set(Utc::now());

        let updated = active.update(self.db.as_ref()).await.map_err(|e| {
            error!("Failed to resolve invoice {}: {}", invoice_id, e);
            ServiceError::db_error(e)
        })?;

        info!(invoice_id = %invoice_id, "Invoice discrepancy resolved");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<invoices::Model>, ServiceError> {
        InvoiceEntity::find_by_id(invoice_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Mismatched invoices still awaiting manual resolution, oldest first.
    #[instrument(skip(self))]
    pub async fn list_unresolved_mismatches(&self) -> Result<Vec<invoices::Model>, ServiceError> {
        InvoiceEntity::find()
            .filter(invoices::Column::MatchStatus.eq(InvoiceMatchStatus::Mismatched))
            .filter(invoices::Column::Matched.eq(false))
            .order_by_asc(invoices::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TOL: Decimal = dec!(0.02);

    #[test]
    fn exact_values_are_within_tolerance() {
        assert!(within_tolerance(dec!(100), dec!(100), TOL));
    }

    #[test]
    fn two_percent_band_is_inclusive() {
        assert!(within_tolerance(dec!(102), dec!(100), TOL));
        assert!(within_tolerance(dec!(98), dec!(100), TOL));
        assert!(!within_tolerance(dec!(102.01), dec!(100), TOL));
        assert!(!within_tolerance(dec!(97.99), dec!(100), TOL));
    }

    #[test]
    fn zero_expected_only_matches_zero() {
        assert!(within_tolerance(Decimal::ZERO, Decimal::ZERO, TOL));
        assert!(!within_tolerance(dec!(0.01), Decimal::ZERO, TOL));
    }

    #[test]
    fn fifty_percent_price_deviation_is_out_of_tolerance() {
        assert!(!within_tolerance(dec!(150), dec!(100), TOL));
    }

    proptest::proptest! {
        #[test]
        fn any_amount_matches_itself(cents in -1_000_000i64..1_000_000) {
            let value = Decimal::new(cents, 2);
            proptest::prop_assert!(within_tolerance(value, value, TOL));
        }

        #[test]
        fn three_percent_above_never_matches_a_two_percent_band(cents in 1i64..1_000_000) {
            let expected = Decimal::new(cents, 2);
            let actual = expected * dec!(1.03);
            proptest::prop_assert!(!within_tolerance(actual, expected, TOL));
        }
    }
}

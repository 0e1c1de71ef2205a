use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{NotificationDispatcher, Priority};
use crate::events::{Event, EventHandler};

/// Fans workflow events out to the procurement recipients. Routine
/// bookkeeping events (supplier CRUD, matched invoices) stay silent;
/// anything that needs a human lands in the channels.
pub struct NotificationEventHandler {
    dispatcher: Arc<NotificationDispatcher>,
    recipients: Vec<String>,
}

impl NotificationEventHandler {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, recipients: Vec<String>) -> Self {
        Self {
            dispatcher,
            recipients,
        }
    }

    fn render(event: &Event) -> Option<(String, String, Priority)> {
        match event {
            Event::PurchaseOrderCreated(po_id) => Some((
                "Purchase order created".to_string(),
                format!("Purchase order {} is pending approval.", po_id),
                Priority::Normal,
            )),
            Event::PurchaseOrderApproved {
                po_id,
                approved_by,
                approval_level,
            } => Some((
                "Purchase order approved".to_string(),
                format!(
                    "Purchase order {} approved by {} (level {}).",
                    po_id, approved_by, approval_level
                ),
                Priority::Normal,
            )),
            Event::PurchaseOrderRejected {
                po_id,
                rejected_by,
                reason,
            } => Some((
                "Purchase order rejected".to_string(),
                format!(
                    "Purchase order {} rejected by {}: {}",
                    po_id, rejected_by, reason
                ),
                Priority::Normal,
            )),
            Event::GoodsReceived { po_id, full, .. } => {
                let body = if *full {
                    format!("Purchase order {} is fully received.", po_id)
                } else {
                    format!("Partial receipt recorded against purchase order {}.", po_id)
                };
                Some(("Goods receipt recorded".to_string(), body, Priority::Normal))
            }
            Event::ShortageDetected {
                po_id,
                missing_items,
                ..
            } => Some((
                "Delivery shortage detected".to_string(),
                format!(
                    "Purchase order {} is short on: {}.",
                    po_id,
                    missing_items.join(", ")
                ),
                Priority::High,
            )),
            Event::InvoiceMismatched { invoice_id, note } => Some((
                "Invoice mismatch".to_string(),
                format!("Invoice {} failed matching: {}", invoice_id, note),
                Priority::High,
            )),
            Event::LowStockOrdersCreated {
                po_ids,
                skipped_items,
            } => {
                let mut body = format!("{} replenishment order(s) placed.", po_ids.len());
                if !skipped_items.is_empty() {
                    body.push_str(&format!(" Skipped: {}.", skipped_items.join(", ")));
                }
                Some((
                    "Replenishment orders created".to_string(),
                    body,
                    Priority::Normal,
                ))
            }
            Event::InvoiceMatched(_)
            | Event::SupplierCreated(_)
            | Event::SupplierDeactivated(_)
            | Event::Generic { .. } => None,
        }
    }
}

#[async_trait]
impl EventHandler for NotificationEventHandler {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        let Some((title, body, priority)) = Self::render(&event) else {
            return Ok(());
        };
        if self.recipients.is_empty() {
            return Ok(());
        }

        let summary = self
            .dispatcher
            .dispatch(&self.recipients, &title, &body, priority)
            .await;
        debug!(
            delivered = summary.delivered,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            "Event notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn shortages_and_mismatches_render_as_high_priority() {
        let shortage = Event::ShortageDetected {
            po_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            missing_items: vec!["Flour (25kg)".to_string()],
        };
        let (_, body, priority) = NotificationEventHandler::render(&shortage).unwrap();
        assert_eq!(priority, Priority::High);
        assert!(body.contains("Flour (25kg)"));

        let mismatch = Event::InvoiceMismatched {
            invoice_id: Uuid::new_v4(),
            note: "total deviates".to_string(),
        };
        let (_, _, priority) = NotificationEventHandler::render(&mismatch).unwrap();
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn routine_events_stay_silent() {
        assert!(NotificationEventHandler::render(&Event::SupplierCreated(Uuid::new_v4())).is_none());
        assert!(NotificationEventHandler::render(&Event::InvoiceMatched(Uuid::new_v4())).is_none());
    }

    #[test]
    fn full_and_partial_receipts_read_differently() {
        let po_id = Uuid::new_v4();
        let full = Event::GoodsReceived {
            po_id,
            receipt_id: Uuid::new_v4(),
            full: true,
        };
        let partial = Event::GoodsReceived {
            po_id,
            receipt_id: Uuid::new_v4(),
            full: false,
        };
        let (_, full_body, _) = NotificationEventHandler::render(&full).unwrap();
        let (_, partial_body, _) = NotificationEventHandler::render(&partial).unwrap();
        assert!(full_body.contains("fully received"));
        assert!(partial_body.contains("Partial receipt"));
    }
}

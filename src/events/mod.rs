use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of propagating on failure.
    ///
    /// Workflow writes must not fail because the event channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Create a bounded event channel plus its sender handle.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderApproved {
        po_id: Uuid,
        approved_by: String,
        approval_level: i16,
    },
    PurchaseOrderRejected {
        po_id: Uuid,
        rejected_by: String,
        reason: String,
    },

    // Goods receipt events
    GoodsReceived {
        po_id: Uuid,
        receipt_id: Uuid,
        full: bool,
    },
    ShortageDetected {
        po_id: Uuid,
        supplier_id: Uuid,
        missing_items: Vec<String>,
    },

    // Invoice events
    InvoiceMatched(Uuid),
    InvoiceMismatched {
        invoice_id: Uuid,
        note: String,
    },

    // Replenishment events
    LowStockOrdersCreated {
        po_ids: Vec<Uuid>,
        skipped_items: Vec<String>,
    },

    // Supplier events
    SupplierCreated(Uuid),
    SupplierDeactivated(Uuid),

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Define a trait for handling events. Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

// Function to process incoming events and distribute them to registered event handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                error!("Event handler failed: event={:?}, error={}", event, e);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct RecordingHandler {
        seen: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.seen.lock().await.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_reach_registered_handlers() {
        let (sender, rx) = event_channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler { seen: seen.clone() };

        let worker = tokio::spawn(process_events(rx, vec![Box::new(handler)]));

        let po_id = Uuid::new_v4();
        sender.send(Event::PurchaseOrderCreated(po_id)).await.unwrap();
        drop(sender);

        worker.await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Event::PurchaseOrderCreated(id) if id == po_id));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = event_channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.send_or_log(Event::with_data("orphan".to_string())).await;
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted after a service operation commits.
///
/// Delivery is advisory: the database transaction is the source of truth and
/// has already committed by the time an event is sent, so consumers must
/// tolerate missed events and reconcile from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockAdded {
        record_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        new_quantity: i32,
        transaction_id: Uuid,
    },
    StockRemoved {
        record_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        new_quantity: i32,
        transaction_id: Uuid,
    },
    StockReserved {
        record_id: Uuid,
        quantity: i32,
        reserved_quantity: i32,
        transaction_id: Uuid,
    },
    ReservationReleased {
        record_id: Uuid,
        quantity: i32,
        reserved_quantity: i32,
        transaction_id: Uuid,
    },
    InventoryAdjusted {
        record_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
        reason: String,
        transaction_id: Uuid,
        reference_number: String,
    },
    StockTransferred {
        source_record_id: Uuid,
        dest_record_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        reference_number: String,
    },
    LowStockDetected {
        record_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        available_quantity: i32,
        reorder_point: i32,
    },

    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderSubmitted(Uuid),
    PurchaseOrderCancelled(Uuid),
    PurchaseOrderReceived {
        po_id: Uuid,
        items_received: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Post-commit notification: the mutation already committed, so a full
    /// channel or dropped receiver is logged and swallowed.
    pub async fn notify(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event channel unavailable, dropping event");
        }
    }
}

/// Creates a bounded event channel.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel into the log. Stands in for the richer
/// consumers (webhooks, projections) the surrounding platform attaches.
pub fn spawn_event_logger(mut receiver: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Event::LowStockDetected {
                record_id,
                available_quantity,
                reorder_point,
                ..
            } = &event
            {
                info!(
                    record_id = %record_id,
                    available = available_quantity,
                    reorder_point = reorder_point,
                    "low stock detected"
                );
            }
            match serde_json::to_string(&event) {
                Ok(payload) => debug!(%payload, "inventory event"),
                Err(e) => warn!(error = %e, "failed to serialize event"),
            }
        }
        debug!("event channel closed, logger exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (sender, mut rx) = event_channel(4);
        sender
            .send(Event::PurchaseOrderCreated(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Event::PurchaseOrderCreated(_))));
    }

    #[tokio::test]
    async fn notify_swallows_closed_channel() {
        let (sender, rx) = event_channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.notify(Event::PurchaseOrderSubmitted(Uuid::new_v4())).await;
    }
}

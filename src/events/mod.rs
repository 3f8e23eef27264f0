use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentStatus};

/// Events emitted by the order lifecycle. Delivery is best-effort: a full
/// or closed channel is logged and dropped, never surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },
    OrderFinalized(Uuid),
    PaymentVerificationFailed(Uuid),
    /// A checkout attempt was rejected before an order existed
    /// (stale cart or unavailable items).
    CheckoutRejected {
        reason: String,
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

    /// Builds a sender/receiver pair with a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event, logging on failure instead of propagating it.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

/// Drains the event channel and logs each event. Spawned at startup;
/// the audit trail for lifecycle transitions.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                status,
                payment_status,
            } => {
                info!(
                    order_id = %order_id,
                    status = ?status,
                    payment_status = ?payment_status,
                    "event: order status changed"
                );
            }
            Event::OrderFinalized(order_id) => {
                info!(order_id = %order_id, "event: order finalized");
            }
            Event::PaymentVerificationFailed(order_id) => {
                warn!(order_id = %order_id, "event: payment verification failed");
            }
            Event::CheckoutRejected { reason } => {
                info!(reason = %reason, "event: checkout rejected");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}

//! In-process event fanout. Route handlers emit events after their
//! transaction commits; the processor logs them for the realtime/audit
//! collaborators that sit outside this service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Post-commit emission is best-effort; a full channel must not fail the
    /// already-committed request.
    pub async fn send_best_effort(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("dropping event: {}", e);
        }
    }
}

/// Events emitted by the route layer after commit. Each carries the entity's
/// post-mutation field values, enough for an audit row or a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementPosted {
        movement_id: Uuid,
        tenant_id: Uuid,
        movement_type: String,
        product_id: Uuid,
        batch_id: Option<Uuid>,
        from_location_id: Option<Uuid>,
        to_location_id: Option<Uuid>,
        quantity: Decimal,
        number: i64,
    },
    BalanceChanged {
        balance_id: Uuid,
        tenant_id: Uuid,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        reserved_quantity: Decimal,
        version: i32,
    },
    OrderConfirmed {
        order_id: Uuid,
        tenant_id: Uuid,
        reserved_line_count: usize,
    },
    OrderFulfilled {
        order_id: Uuid,
        tenant_id: Uuid,
    },
    OrderDelivered {
        order_id: Uuid,
        tenant_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: Uuid,
        tenant_id: Uuid,
    },
    /// Computed from delivered_at + credit days of the payment mode.
    PaymentDueScheduled {
        order_id: Uuid,
        tenant_id: Uuid,
        due_at: DateTime<Utc>,
    },
    RequestFulfilled {
        request_id: Uuid,
        tenant_id: Uuid,
    },
    RequestAutoApplied {
        request_id: Uuid,
        tenant_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    },
    BatchReleased {
        batch_id: Uuid,
        tenant_id: Uuid,
    },
    /// Written whenever the expiry gate blocks a movement, before the 409 is
    /// returned; audit action `stock.expiry.blocked`.
    ExpiryBlocked {
        tenant_id: Uuid,
        batch_id: Uuid,
        batch_number: String,
        expires_at: NaiveDate,
    },
}

/// Background consumer; logs each event where a realtime broadcaster or audit
/// writer would hook in.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::ExpiryBlocked {
                tenant_id,
                batch_number,
                expires_at,
                ..
            } => {
                info!(
                    tenant_id = %tenant_id,
                    batch_number = %batch_number,
                    expires_at = %expires_at,
                    "audit: stock.expiry.blocked"
                );
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }
    info!("event channel closed; processor exiting");
}

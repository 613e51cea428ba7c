use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Assignment Events
// ============================================================================
//
// Successful (re)assignments emit a fire-and-forget event for downstream
// consumers (driver app push, customer "your order is on its way" mail).
// A failed emit is logged by the caller and never fails the assignment.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Uuid,
    pub reassignment: bool,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait AssignmentNotifier: Send + Sync {
    async fn publish(&self, event: &AssignmentEvent) -> anyhow::Result<()>;
}

/// In-process fan-out over a broadcast channel. Having no subscribers is not
/// a failure; the event is simply dropped.
pub struct ChannelNotifier {
    tx: broadcast::Sender<AssignmentEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl AssignmentNotifier for ChannelNotifier {
    async fn publish(&self, event: &AssignmentEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        match self.tx.send(event.clone()) {
            Ok(subscribers) => {
                tracing::debug!(
                    order_id = %event.order_id,
                    driver_id = %event.driver_id,
                    subscribers = subscribers,
                    payload = %payload,
                    "assignment event delivered"
                );
            }
            Err(_) => {
                tracing::debug!(
                    order_id = %event.order_id,
                    "no subscribers for assignment event"
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

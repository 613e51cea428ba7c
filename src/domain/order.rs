use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

// ============================================================================
// Order Read Model
// ============================================================================
//
// Orders are created by the checkout workflow with status pending and no
// assigned agent. The allocator sets delivery_person_id; delivery_status
// advances monotonically, with cancellation reachable only from pending or
// preparing. Every transition (and every assignment) appends a row to the
// status history.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Set by the allocator, exactly once in the happy path. Re-assignment
    /// overwrites silently; guarding against that is the caller's job.
    pub delivery_person_id: Option<Uuid>,
    pub delivery_status: DeliveryStatus,
    /// Authoritative total, shipping included; caps point redemption.
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Preparing,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// An order in an active status counts toward its driver's workload.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Pending | DeliveryStatus::Preparing | DeliveryStatus::InTransit
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Preparing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Preparing => "preparing",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "preparing" => Ok(DeliveryStatus::Preparing),
            "in_transit" => Ok(DeliveryStatus::InTransit),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "cancelled" => Ok(DeliveryStatus::Cancelled),
            other => Err(ParseEnumError::new("delivery_status", other)),
        }
    }
}

// ============================================================================
// Status History
// ============================================================================

/// Append-only audit row. Assignment appends one carrying the order's
/// *current* status; binding an agent does not advance the status itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub delivery_status: DeliveryStatus,
    pub changed_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(order: &Order, changed_by: Uuid, notes: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            delivery_status: order.delivery_status,
            changed_by,
            notes: Some(notes.into()),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::loyalty::PointTransaction;
use crate::domain::order::StatusHistoryEntry;
use crate::domain::user::User;
use crate::domain::ParseEnumError;

// ============================================================================
// Store Contracts
// ============================================================================
//
// Two narrow repository traits, one per service. Both are implemented by the
// in-process MemoryStore (demo, tests) and by PostgresStore.
//
// Atomicity contract: record_entry and expire_entry commit the ledger write
// and the cached-balance mutation together, all-or-nothing. That is the one
// hard invariant every backend must preserve exactly.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] ParseEnumError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The allocator's view: candidate agents, their load, and the two writes an
/// assignment performs.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Delivery-role agents with driver_status available.
    async fn available_drivers(&self) -> Result<Vec<User>, StoreError>;

    /// Count of the driver's orders in a non-terminal delivery status.
    async fn active_delivery_count(&self, driver_id: Uuid) -> Result<i64, StoreError>;

    /// Bind the agent to the order. Overwrites any prior assignment.
    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<(), StoreError>;

    async fn append_status_history(&self, entry: StatusHistoryEntry) -> Result<(), StoreError>;
}

/// The ledger's view: user lookups, balance reads, and the atomic writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// The cached balance column, the fast path next to the ledger.
    async fn points_balance(&self, user_id: Uuid) -> Result<i64, StoreError>;

    /// Insert the entry and move the user's cached balance by exactly
    /// `entry.points`, committed together.
    async fn record_entry(&self, entry: &PointTransaction) -> Result<(), StoreError>;

    async fn entries_for_user(&self, user_id: Uuid) -> Result<Vec<PointTransaction>, StoreError>;

    async fn earned_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError>;

    async fn redeemed_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError>;

    /// Earned entries due for expiry at `now`, skipping entries of users
    /// whose cached balance is negative.
    async fn due_earned_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PointTransaction>, StoreError>;

    /// Flip an earned entry to expired and deduct its points from the cached
    /// balance, committed together. Returns the points removed; 0 when the
    /// entry is no longer eligible, which makes the sweep idempotent.
    async fn expire_entry(&self, entry_id: Uuid) -> Result<i64, StoreError>;
}

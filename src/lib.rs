// ============================================================================
// Bakery Fulfillment Core
// ============================================================================
//
// Business-logic core for the bakery platform's order fulfillment:
//
// - domain::delivery — least-loaded delivery-agent allocation
// - domain::loyalty  — append-only loyalty points ledger
// - store            — persistence contracts (in-memory and Postgres)
// - events           — fire-and-forget assignment notifications
// - metrics          — Prometheus instruments + scrape endpoint
//
// The checkout/order workflow invokes these services in-process; there is no
// wire protocol of its own here.
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod events;
pub mod metrics;
pub mod store;
pub mod utils;

// Re-export the service surface for convenience
pub use domain::delivery::{AssignmentOutcome, DeliveryAllocator, DriverWorkload};
pub use domain::loyalty::{
    redemption_discount, LoyaltyError, LoyaltyLedger, PointTransaction, PointsSummary,
    TransactionKind,
};
pub use domain::order::{DeliveryStatus, Order, StatusHistoryEntry};
pub use domain::user::{DriverStatus, MembershipTier, Role, User};
pub use store::{FleetStore, LedgerStore, MemoryStore, PostgresStore, StoreError};

// ============================================================================
// Delivery Domain - Agent Allocation
// ============================================================================
//
// Load-balanced binding of orders to delivery agents:
// - Service (DeliveryAllocator: assign, reassign, workload)
// - Outcome modeling (AssignmentOutcome)
//
// ============================================================================

pub mod service;

// Re-export for convenience
pub use service::*;

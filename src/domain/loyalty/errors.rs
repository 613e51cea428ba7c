use rust_decimal::Decimal;
use uuid::Uuid;

use crate::store::StoreError;

// ============================================================================
// Loyalty Business Rule Errors
// ============================================================================
//
// Redemption and refund errors propagate to the checkout/cancellation
// workflow; earning and expiry absorb infrastructure errors at the service
// boundary and only surface them through logging and metrics.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LoyaltyError {
    #[error("insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("redemption of {requested} points exceeds order total {order_total}")]
    ExcessiveRedemption {
        requested: i64,
        order_total: Decimal,
    },

    #[error("order {0} already has a redemption recorded")]
    AlreadyRedeemed(Uuid),

    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

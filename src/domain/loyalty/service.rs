use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::order::Order;
use crate::domain::user::User;
use crate::metrics::Metrics;
use crate::store::LedgerStore;

use super::errors::LoyaltyError;
use super::value_objects::{PointTransaction, PointsSummary};

// ============================================================================
// Loyalty Ledger Service
// ============================================================================
//
// Maintains a correct, auditable point balance per user, tied to order
// lifecycle events. Every balance-affecting write appends a ledger entry and
// moves the cached balance in the same store transaction; on top of that,
// validate+write for a single user is serialized behind a per-user mutex so
// concurrent redeem/refund calls cannot interleave into a corrupted balance.
//
// ============================================================================

/// Pure preview of a redemption's effect: 1 point = 1 currency unit, capped
/// at the order's total (shipping included).
pub fn redemption_discount(points_to_redeem: i64, order_total: Decimal) -> Decimal {
    if points_to_redeem <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(points_to_redeem).min(order_total)
}

pub struct LoyaltyLedger<S: LedgerStore> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
    user_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<S: LedgerStore> LoyaltyLedger<S> {
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Single-writer guard for one user's ledger.
    async fn lock_user(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Award points for a captured order: floor(total × tier rate).
    ///
    /// Infrastructure failures are absorbed here. The order flow must not be
    /// blocked by a loyalty hiccup, so the caller gets no signal; the failure
    /// is logged and counted instead.
    pub async fn process_order_earn(&self, order: &Order) {
        if let Err(e) = self.try_earn(order).await {
            self.metrics
                .absorbed_failures_total
                .with_label_values(&["earn"])
                .inc();
            tracing::error!(
                order_id = %order.id,
                user_id = %order.user_id,
                error = %e,
                "point earning failed; order flow continues without points"
            );
        }
    }

    async fn try_earn(&self, order: &Order) -> Result<(), LoyaltyError> {
        let _guard = self.lock_user(order.user_id).await;

        let user = self
            .store
            .user(order.user_id)
            .await?
            .ok_or(LoyaltyError::UserNotFound(order.user_id))?;

        let rate = user.membership_tier.earn_rate();
        let points = (order.total * rate).floor().to_i64().unwrap_or(0);
        if points <= 0 {
            tracing::debug!(
                order_id = %order.id,
                total = %order.total,
                "order too small to earn points"
            );
            return Ok(());
        }

        // At most one earned entry per order.
        if self.store.earned_entry_for_order(order.id).await?.is_some() {
            tracing::warn!(
                order_id = %order.id,
                "earned entry already recorded for order; skipping"
            );
            return Ok(());
        }

        let entry = PointTransaction::earned(order.user_id, order.id, points);
        self.store.record_entry(&entry).await?;

        self.metrics
            .ledger_entries_total
            .with_label_values(&["earned"])
            .inc();
        tracing::info!(
            user_id = %order.user_id,
            order_id = %order.id,
            points = points,
            tier = ?user.membership_tier,
            "points earned"
        );
        Ok(())
    }

    /// Spend points against an order at checkout.
    ///
    /// Unlike earning, failures here propagate: the checkout must know the
    /// redemption did not apply so it can abort the sale.
    pub async fn redeem_for_order(
        &self,
        user: &User,
        points_to_redeem: i64,
        order: &Order,
    ) -> Result<Option<PointTransaction>, LoyaltyError> {
        if points_to_redeem <= 0 {
            return Ok(None);
        }

        let _guard = self.lock_user(user.id).await;

        // Re-read under the lock; the caller's snapshot may be stale.
        let available = self.store.points_balance(user.id).await?;
        if available < points_to_redeem {
            return Err(LoyaltyError::InsufficientPoints {
                requested: points_to_redeem,
                available,
            });
        }

        // A zero-total order (fully covered by points) is exempt from the
        // cap, permitting 100%-points checkouts.
        if order.total > Decimal::ZERO && Decimal::from(points_to_redeem) > order.total {
            return Err(LoyaltyError::ExcessiveRedemption {
                requested: points_to_redeem,
                order_total: order.total,
            });
        }

        if self.store.redeemed_entry_for_order(order.id).await?.is_some() {
            return Err(LoyaltyError::AlreadyRedeemed(order.id));
        }

        let entry = PointTransaction::redeemed(user.id, order.id, points_to_redeem);
        self.store.record_entry(&entry).await?;

        self.metrics
            .ledger_entries_total
            .with_label_values(&["redeemed"])
            .inc();
        tracing::info!(
            user_id = %user.id,
            order_id = %order.id,
            points = points_to_redeem,
            "points redeemed"
        );
        Ok(Some(entry))
    }

    /// Return redeemed points when an order carrying a redemption is
    /// cancelled. No redemption on the order is a no-op, not an error.
    pub async fn refund_for_order(
        &self,
        order: &Order,
    ) -> Result<Option<PointTransaction>, LoyaltyError> {
        let Some(redeemed) = self.store.redeemed_entry_for_order(order.id).await? else {
            tracing::debug!(order_id = %order.id, "no redemption on order; nothing to refund");
            return Ok(None);
        };

        let points = redeemed.points.abs();
        if points == 0 {
            return Ok(None);
        }

        let _guard = self.lock_user(redeemed.user_id).await;

        let entry = PointTransaction::refunded(redeemed.user_id, order.id, points);
        self.store.record_entry(&entry).await?;

        self.metrics
            .ledger_entries_total
            .with_label_values(&["refunded"])
            .inc();
        tracing::info!(
            user_id = %redeemed.user_id,
            order_id = %order.id,
            points = points,
            "redeemed points refunded"
        );
        Ok(Some(entry))
    }

    /// Expire earned entries past their expires_at. Intended to run from an
    /// external scheduler; each row is handled independently and
    /// idempotently, so a partially-completed run simply leaves the rest for
    /// the next one. Returns total points expired.
    pub async fn expire_outstanding(&self) -> Result<i64, LoyaltyError> {
        let now = Utc::now();
        let due = self.store.due_earned_entries(now).await?;
        if due.is_empty() {
            tracing::debug!("no points due for expiry");
            return Ok(0);
        }

        let mut total_expired = 0i64;
        for entry in due {
            let _guard = self.lock_user(entry.user_id).await;
            match self.store.expire_entry(entry.id).await {
                // 0 means another run got there first; the scan will not
                // match this row again.
                Ok(0) => {}
                Ok(points) => {
                    total_expired += points;
                    self.metrics.points_expired_total.inc_by(points as u64);
                    tracing::info!(
                        user_id = %entry.user_id,
                        entry_id = %entry.id,
                        points = points,
                        "points expired"
                    );
                }
                Err(e) => {
                    self.metrics
                        .absorbed_failures_total
                        .with_label_values(&["expire"])
                        .inc();
                    tracing::error!(
                        entry_id = %entry.id,
                        error = %e,
                        "failed to expire entry; continuing with the rest"
                    );
                }
            }
        }

        tracing::info!(total_expired = total_expired, "expiry sweep complete");
        Ok(total_expired)
    }

    /// Authoritative balance view recomputed from the ledger, distinct from
    /// the fast-path cached `points` column.
    pub async fn user_balance(&self, user_id: Uuid) -> Result<PointsSummary, LoyaltyError> {
        let entries = self.store.entries_for_user(user_id).await?;
        Ok(PointsSummary::from_entries(&entries, Utc::now()))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

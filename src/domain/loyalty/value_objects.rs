use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ParseEnumError;

// ============================================================================
// Loyalty Value Objects
// ============================================================================

/// Earned points live this long before the expiry sweep collects them.
pub const EARNED_POINTS_TTL_DAYS: i64 = 365;

/// Window used by the balance summary to flag points about to lapse.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earned,
    Redeemed,
    Expired,
    Adjusted,
    Refunded,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earned => "earned",
            TransactionKind::Redeemed => "redeemed",
            TransactionKind::Expired => "expired",
            TransactionKind::Adjusted => "adjusted",
            TransactionKind::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earned" => Ok(TransactionKind::Earned),
            "redeemed" => Ok(TransactionKind::Redeemed),
            "expired" => Ok(TransactionKind::Expired),
            "adjusted" => Ok(TransactionKind::Adjusted),
            "refunded" => Ok(TransactionKind::Refunded),
            other => Err(ParseEnumError::new("transaction_kind", other)),
        }
    }
}

/// One ledger entry. Never mutated after creation, with a single exception:
/// the expiry sweep rewrites kind from earned to expired in place.
///
/// Sign convention: `points` is positive for earned/refunded and upward
/// adjustments, negative for redeemed. The cached user balance always moves
/// by exactly `points` when the entry is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Adjustments and expiry may be order-less.
    pub order_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub points: i64,
    pub description: String,
    /// Set only on earned entries.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PointTransaction {
    pub fn earned(user_id: Uuid, order_id: Uuid, points: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id: Some(order_id),
            kind: TransactionKind::Earned,
            points,
            description: format!("Points earned on order {order_id}"),
            expires_at: Some(now + Duration::days(EARNED_POINTS_TTL_DAYS)),
            created_at: now,
        }
    }

    pub fn redeemed(user_id: Uuid, order_id: Uuid, points: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id: Some(order_id),
            kind: TransactionKind::Redeemed,
            points: -points,
            description: format!("Points redeemed on order {order_id}"),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn refunded(user_id: Uuid, order_id: Uuid, points: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id: Some(order_id),
            kind: TransactionKind::Refunded,
            points,
            description: format!("Points refunded for cancelled order {order_id}"),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn adjusted(user_id: Uuid, points: i64, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id: None,
            kind: TransactionKind::Adjusted,
            points,
            description: description.into(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Balance Summary
// ============================================================================

/// Recomputed from the ledger, not the cached balance column. This is the
/// reconciliation view; `users.points` is the fast path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsSummary {
    /// Sum of non-expired earned entries.
    pub earned: i64,
    /// Sum of redeemed magnitudes.
    pub redeemed: i64,
    /// max(0, earned - redeemed)
    pub available: i64,
    /// Earned points lapsing within the warning window.
    pub expiring_soon: i64,
}

impl PointsSummary {
    pub fn from_entries(entries: &[PointTransaction], now: DateTime<Utc>) -> Self {
        let warning_cutoff = now + Duration::days(EXPIRY_WARNING_DAYS);
        let mut earned = 0i64;
        let mut redeemed = 0i64;
        let mut expiring_soon = 0i64;

        for entry in entries {
            match entry.kind {
                TransactionKind::Earned => {
                    earned += entry.points;
                    if let Some(expires_at) = entry.expires_at {
                        if expires_at > now && expires_at <= warning_cutoff {
                            expiring_soon += entry.points;
                        }
                    }
                }
                TransactionKind::Redeemed => redeemed += entry.points.abs(),
                _ => {}
            }
        }

        Self {
            earned,
            redeemed,
            available: (earned - redeemed).max(0),
            expiring_soon,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_convention() {
        let user_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();

        let earned = PointTransaction::earned(user_id, order_id, 100);
        assert_eq!(earned.points, 100);
        assert!(earned.expires_at.is_some());

        let redeemed = PointTransaction::redeemed(user_id, order_id, 40);
        assert_eq!(redeemed.points, -40);
        assert!(redeemed.expires_at.is_none());

        let refunded = PointTransaction::refunded(user_id, order_id, 40);
        assert_eq!(refunded.points, 40);

        let adjusted = PointTransaction::adjusted(user_id, -15, "support correction");
        assert_eq!(adjusted.points, -15);
        assert!(adjusted.order_id.is_none());
    }

    #[test]
    fn test_earned_entry_expiry_default() {
        let entry = PointTransaction::earned(Uuid::new_v4(), Uuid::new_v4(), 10);
        let ttl = entry.expires_at.unwrap() - entry.created_at;
        assert_eq!(ttl.num_days(), EARNED_POINTS_TTL_DAYS);
    }

    #[test]
    fn test_summary_from_entries() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut soon = PointTransaction::earned(user_id, Uuid::new_v4(), 30);
        soon.expires_at = Some(now + Duration::days(10));
        let later = PointTransaction::earned(user_id, Uuid::new_v4(), 70);
        let redeemed = PointTransaction::redeemed(user_id, Uuid::new_v4(), 25);

        let summary = PointsSummary::from_entries(&[soon, later, redeemed], now);
        assert_eq!(summary.earned, 100);
        assert_eq!(summary.redeemed, 25);
        assert_eq!(summary.available, 75);
        assert_eq!(summary.expiring_soon, 30);
    }

    #[test]
    fn test_summary_ignores_expired_entries() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut expired = PointTransaction::earned(user_id, Uuid::new_v4(), 50);
        expired.kind = TransactionKind::Expired;
        let live = PointTransaction::earned(user_id, Uuid::new_v4(), 20);

        let summary = PointsSummary::from_entries(&[expired, live], now);
        assert_eq!(summary.earned, 20);
        assert_eq!(summary.available, 20);
    }

    #[test]
    fn test_summary_available_never_negative() {
        let user_id = Uuid::new_v4();
        let entries = vec![
            PointTransaction::earned(user_id, Uuid::new_v4(), 10),
            PointTransaction::redeemed(user_id, Uuid::new_v4(), 30),
        ];
        let summary = PointsSummary::from_entries(&entries, Utc::now());
        assert_eq!(summary.available, 0);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            TransactionKind::Earned,
            TransactionKind::Redeemed,
            TransactionKind::Expired,
            TransactionKind::Adjusted,
            TransactionKind::Refunded,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

// ============================================================================
// User Read Model
// ============================================================================
//
// Users are owned by the identity subsystem. This crate reads role and
// driver_status for allocation, reads membership_tier for earning, and moves
// the cached points balance together with ledger writes.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Only meaningful for the delivery role.
    pub driver_status: DriverStatus,
    pub membership_tier: MembershipTier,
    /// Cached balance; must equal the sum of this user's ledger entries.
    pub points: i64,
    /// Registration time, used as the allocator tie-break.
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_available_driver(&self) -> bool {
        self.role == Role::Delivery && self.driver_status == DriverStatus::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    Admin,
    Client,
    Delivery,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::Admin => "admin",
            Role::Client => "client",
            Role::Delivery => "delivery",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superadmin" => Ok(Role::Superadmin),
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            "delivery" => Ok(Role::Delivery),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Busy,
    OffDuty,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
            DriverStatus::OffDuty => "off_duty",
        }
    }
}

impl std::str::FromStr for DriverStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(DriverStatus::Available),
            "busy" => Ok(DriverStatus::Busy),
            "off_duty" => Ok(DriverStatus::OffDuty),
            other => Err(ParseEnumError::new("driver_status", other)),
        }
    }
}

/// Membership tier determines the earn percentage applied to order totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    None,
    Premium,
    Vip,
}

impl MembershipTier {
    /// Fraction of an order's total converted to loyalty points.
    /// Fixed tiers; there is no configuration surface for these.
    pub fn earn_rate(&self) -> Decimal {
        match self {
            MembershipTier::None => Decimal::new(2, 2),
            MembershipTier::Premium => Decimal::new(5, 2),
            MembershipTier::Vip => Decimal::new(10, 2),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipTier::None => "none",
            MembershipTier::Premium => "premium",
            MembershipTier::Vip => "vip",
        }
    }
}

impl std::str::FromStr for MembershipTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MembershipTier::None),
            "premium" => Ok(MembershipTier::Premium),
            "vip" => Ok(MembershipTier::Vip),
            other => Err(ParseEnumError::new("membership_tier", other)),
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
    fn test_earn_rates_per_tier() {
        assert_eq!(MembershipTier::None.earn_rate(), Decimal::new(2, 2));
        assert_eq!(MembershipTier::Premium.earn_rate(), Decimal::new(5, 2));
        assert_eq!(MembershipTier::Vip.earn_rate(), Decimal::new(10, 2));
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Superadmin, Role::Admin, Role::Client, Role::Delivery] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("driver".parse::<Role>().is_err());
    }

    #[test]
    fn test_driver_status_round_trip() {
        for status in [DriverStatus::Available, DriverStatus::Busy, DriverStatus::OffDuty] {
            assert_eq!(status.as_str().parse::<DriverStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_availability_requires_delivery_role() {
        let mut user = User {
            id: Uuid::new_v4(),
            name: "Amira".to_string(),
            email: "amira@example.com".to_string(),
            role: Role::Delivery,
            driver_status: DriverStatus::Available,
            membership_tier: MembershipTier::None,
            points: 0,
            created_at: Utc::now(),
        };
        assert!(user.is_available_driver());

        user.driver_status = DriverStatus::Busy;
        assert!(!user.is_available_driver());

        user.driver_status = DriverStatus::Available;
        user.role = Role::Client;
        assert!(!user.is_available_driver());
    }

    #[test]
    fn test_tier_serialization() {
        let json = serde_json::to_string(&MembershipTier::Vip).unwrap();
        assert_eq!(json, "\"vip\"");
        let tier: MembershipTier = serde_json::from_str(&json).unwrap();
        assert_eq!(tier, MembershipTier::Vip);
    }
}

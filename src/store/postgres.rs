use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::loyalty::PointTransaction;
use crate::domain::order::{Order, StatusHistoryEntry};
use crate::domain::user::User;

use super::{FleetStore, LedgerStore, StoreError};

// ============================================================================
// Postgres Store
// ============================================================================
//
// Production backend. Enum columns are TEXT; rows convert through the
// domain enums' FromStr impls. The two atomic contracts (record_entry,
// expire_entry) run as one transaction each, with a row lock on the user so
// the entry insert and the balance mutation cannot be split or interleaved.
//
// ============================================================================

const ACTIVE_STATUSES: [&str; 3] = ["pending", "preparing", "in_transit"];

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Idempotent schema bootstrap; safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                driver_status TEXT NOT NULL,
                membership_tier TEXT NOT NULL,
                points BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                delivery_person_id UUID,
                delivery_status TEXT NOT NULL,
                total NUMERIC(12, 2) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS order_status_history (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL,
                delivery_status TEXT NOT NULL,
                changed_by UUID NOT NULL,
                notes TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS point_transactions (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                order_id UUID,
                kind TEXT NOT NULL,
                points BIGINT NOT NULL,
                description TEXT NOT NULL,
                expires_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("fulfillment schema ready");
        Ok(())
    }

    /// Seeding helper for demos and integration environments; production
    /// rows are written by the identity and checkout subsystems.
    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, role, driver_status, membership_tier, points, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.driver_status.as_str())
        .bind(user.membership_tier.as_str())
        .bind(user.points)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, delivery_person_id, delivery_status, total, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.delivery_person_id)
        .bind(order.delivery_status.as_str())
        .bind(order.total)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    driver_status: String,
    membership_tier: String,
    points: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            driver_status: row.driver_status.parse().map_err(StoreError::Corrupt)?,
            membership_tier: row.membership_tier.parse().map_err(StoreError::Corrupt)?,
            points: row.points,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    order_id: Option<Uuid>,
    kind: String,
    points: i64,
    description: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for PointTransaction {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(PointTransaction {
            id: row.id,
            user_id: row.user_id,
            order_id: row.order_id,
            kind: row.kind.parse().map_err(StoreError::Corrupt)?,
            points: row.points,
            description: row.description,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

const ENTRY_COLUMNS: &str =
    "id, user_id, order_id, kind, points, description, expires_at, created_at";

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl FleetStore for PostgresStore {
    async fn available_drivers(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, name, email, role, driver_status, membership_tier, points, created_at
             FROM users
             WHERE role = 'delivery' AND driver_status = 'available'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn active_delivery_count(&self, driver_id: Uuid) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders
             WHERE delivery_person_id = $1 AND delivery_status = ANY($2)",
        )
        .bind(driver_id)
        .bind(&ACTIVE_STATUSES[..])
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET delivery_person_id = $1 WHERE id = $2")
            .bind(driver_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn append_status_history(&self, entry: StatusHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_status_history (id, order_id, delivery_status, changed_by, notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.order_id)
        .bind(entry.delivery_status.as_str())
        .bind(entry.changed_by)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, name, email, role, driver_status, membership_tier, points, created_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn points_balance(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT points FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(points,)| points)
            .ok_or(StoreError::UserNotFound(user_id))
    }

    async fn record_entry(&self, entry: &PointTransaction) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the user keeps the insert and the balance move
        // indivisible against concurrent writers.
        let locked: Option<(i64,)> =
            sqlx::query_as("SELECT points FROM users WHERE id = $1 FOR UPDATE")
                .bind(entry.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::UserNotFound(entry.user_id));
        }

        sqlx::query(
            "INSERT INTO point_transactions (id, user_id, order_id, kind, points, description, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.order_id)
        .bind(entry.kind.as_str())
        .bind(entry.points)
        .bind(&entry.description)
        .bind(entry.expires_at)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET points = points + $1 WHERE id = $2")
            .bind(entry.points)
            .bind(entry.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn entries_for_user(&self, user_id: Uuid) -> Result<Vec<PointTransaction>, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM point_transactions
             WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PointTransaction::try_from).collect()
    }

    async fn earned_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM point_transactions
             WHERE order_id = $1 AND kind = 'earned' LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PointTransaction::try_from).transpose()
    }

    async fn redeemed_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM point_transactions
             WHERE order_id = $1 AND kind = 'redeemed' LIMIT 1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PointTransaction::try_from).transpose()
    }

    async fn due_earned_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PointTransaction>, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT pt.id, pt.user_id, pt.order_id, pt.kind, pt.points, pt.description,
                    pt.expires_at, pt.created_at
             FROM point_transactions pt
             JOIN users u ON u.id = pt.user_id
             WHERE pt.kind = 'earned'
               AND pt.expires_at IS NOT NULL
               AND pt.expires_at <= $1
               AND u.points >= 0
             ORDER BY pt.expires_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PointTransaction::try_from).collect()
    }

    async fn expire_entry(&self, entry_id: Uuid) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The kind predicate under the row lock is what makes the sweep
        // idempotent: a second run finds nothing to flip.
        let row: Option<(Uuid, i64)> = sqlx::query_as(
            "SELECT user_id, points FROM point_transactions
             WHERE id = $1 AND kind = 'earned' FOR UPDATE",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, points)) = row else {
            tx.rollback().await?;
            return Ok(0);
        };

        sqlx::query("UPDATE point_transactions SET kind = 'expired' WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET points = points - $1 WHERE id = $2")
            .bind(points)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(points)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Database round trips need a live Postgres and are covered by integration
// environments; these tests pin down the row conversions the queries rely on.
//
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loyalty::TransactionKind;
    use crate::domain::user::{DriverStatus, MembershipTier, Role};

    #[test]
    fn test_user_row_conversion() {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: "Amira".to_string(),
            email: "amira@example.com".to_string(),
            role: "delivery".to_string(),
            driver_status: "available".to_string(),
            membership_tier: "none".to_string(),
            points: 12,
            created_at: Utc::now(),
        };

        let user = User::try_from(row).unwrap();
        assert_eq!(user.role, Role::Delivery);
        assert_eq!(user.driver_status, DriverStatus::Available);
        assert_eq!(user.membership_tier, MembershipTier::None);
        assert_eq!(user.points, 12);
    }

    #[test]
    fn test_user_row_rejects_unknown_role() {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: "Amira".to_string(),
            email: "amira@example.com".to_string(),
            role: "courier".to_string(),
            driver_status: "available".to_string(),
            membership_tier: "none".to_string(),
            points: 0,
            created_at: Utc::now(),
        };

        assert!(matches!(
            User::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_entry_row_conversion() {
        let row = EntryRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_id: Some(Uuid::new_v4()),
            kind: "redeemed".to_string(),
            points: -30,
            description: "Points redeemed on order".to_string(),
            expires_at: None,
            created_at: Utc::now(),
        };

        let entry = PointTransaction::try_from(row).unwrap();
        assert_eq!(entry.kind, TransactionKind::Redeemed);
        assert_eq!(entry.points, -30);
    }

    #[test]
    fn test_active_statuses_match_domain_predicate() {
        use crate::domain::order::DeliveryStatus;
        for status in ACTIVE_STATUSES {
            assert!(status.parse::<DeliveryStatus>().unwrap().is_active());
        }
        assert!(!ACTIVE_STATUSES.contains(&DeliveryStatus::Delivered.as_str()));
        assert!(!ACTIVE_STATUSES.contains(&DeliveryStatus::Cancelled.as_str()));
    }
}

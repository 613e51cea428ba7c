use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::loyalty::{PointTransaction, TransactionKind};
use crate::domain::order::{Order, StatusHistoryEntry};
use crate::domain::user::{DriverStatus, User};

use super::{FleetStore, LedgerStore, StoreError};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Backs the demo binary and the unit tests. All state sits behind a single
// RwLock, so every trait method is trivially atomic in-process; the
// record_entry/expire_entry contracts hold by construction.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    entries: Vec<PointTransaction>,
    history: Vec<StatusHistoryEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn insert_order(&self, order: Order) {
        self.inner.write().await.orders.insert(order.id, order);
    }

    pub async fn set_driver_status(
        &self,
        user_id: Uuid,
        status: DriverStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.driver_status = status;
        Ok(())
    }

    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.inner.read().await.orders.get(&order_id).cloned()
    }

    pub async fn history(&self) -> Vec<StatusHistoryEntry> {
        self.inner.read().await.history.clone()
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn available_drivers(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|user| user.is_available_driver())
            .cloned()
            .collect())
    }

    async fn active_delivery_count(&self, driver_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .filter(|order| {
                order.delivery_person_id == Some(driver_id) && order.delivery_status.is_active()
            })
            .count() as i64)
    }

    async fn assign_driver(&self, order_id: Uuid, driver_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.delivery_person_id = Some(driver_id);
        Ok(())
    }

    async fn append_status_history(&self, entry: StatusHistoryEntry) -> Result<(), StoreError> {
        self.inner.write().await.history.push(entry);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn points_balance(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(&user_id)
            .map(|user| user.points)
            .ok_or(StoreError::UserNotFound(user_id))
    }

    async fn record_entry(&self, entry: &PointTransaction) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&entry.user_id)
            .ok_or(StoreError::UserNotFound(entry.user_id))?;
        user.points += entry.points;
        inner.entries.push(entry.clone());
        Ok(())
    }

    async fn entries_for_user(&self, user_id: Uuid) -> Result<Vec<PointTransaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn earned_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .find(|entry| {
                entry.order_id == Some(order_id) && entry.kind == TransactionKind::Earned
            })
            .cloned())
    }

    async fn redeemed_entry_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PointTransaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .find(|entry| {
                entry.order_id == Some(order_id) && entry.kind == TransactionKind::Redeemed
            })
            .cloned())
    }

    async fn due_earned_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PointTransaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|entry| {
                entry.kind == TransactionKind::Earned
                    && entry.expires_at.is_some_and(|at| at <= now)
                    && inner
                        .users
                        .get(&entry.user_id)
                        .is_some_and(|user| user.points >= 0)
            })
            .cloned()
            .collect())
    }

    async fn expire_entry(&self, entry_id: Uuid) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(position) = inner
            .entries
            .iter()
            .position(|entry| entry.id == entry_id && entry.kind == TransactionKind::Earned)
        else {
            return Ok(0);
        };

        let (user_id, points) = {
            let entry = &mut inner.entries[position];
            entry.kind = TransactionKind::Expired;
            (entry.user_id, entry.points)
        };

        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.points -= points;
        Ok(points)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

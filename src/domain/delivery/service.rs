use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::order::{Order, StatusHistoryEntry};
use crate::domain::user::User;
use crate::events::{AssignmentEvent, AssignmentNotifier};
use crate::metrics::Metrics;
use crate::store::{FleetStore, StoreError};
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

// ============================================================================
// Delivery Allocator Service
// ============================================================================
//
// Binds an order to exactly one currently-available delivery agent:
// least-loaded candidate first, ties broken by earliest registration. The
// selection-then-update critical section runs behind a single-writer mutex
// so two concurrent calls cannot both pick the same least-loaded agent.
//
// Absence of drivers is an expected operating condition, not a failure; the
// public contract returns None for it, and also for infrastructure errors,
// which are distinguished only through logging and metrics.
//
// ============================================================================

/// Internal result of one allocation attempt. The public Option contract
/// collapses the last two variants; logs and counters keep them apart.
#[derive(Debug)]
pub enum AssignmentOutcome {
    Assigned(User),
    NoCandidate,
    Infrastructure(StoreError),
}

/// Monitoring row for the workload view.
#[derive(Debug, Clone, Serialize)]
pub struct DriverWorkload {
    pub driver_id: Uuid,
    pub name: String,
    pub email: String,
    pub active_orders: i64,
}

pub struct DeliveryAllocator<S: FleetStore> {
    store: Arc<S>,
    notifier: Arc<dyn AssignmentNotifier>,
    metrics: Arc<Metrics>,
    /// Serializes select+update so concurrent assigns see each other's writes.
    assign_gate: Mutex<()>,
}

impl<S: FleetStore> DeliveryAllocator<S> {
    pub fn new(store: Arc<S>, notifier: Arc<dyn AssignmentNotifier>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            notifier,
            metrics,
            assign_gate: Mutex::new(()),
        }
    }

    /// Assign an available agent to an unassigned order.
    ///
    /// Precondition (not enforced here): order.delivery_person_id is None.
    /// Calling this on an already-assigned order silently overwrites.
    pub async fn assign(&self, order: &Order) -> Option<User> {
        let outcome = self.allocate(order, None, false).await;
        self.conclude(order, outcome, false)
    }

    /// Same selection as assign, with the excluded agent (typically the one
    /// who just failed or declined) removed from the candidate set.
    pub async fn reassign(&self, order: &Order, exclude_agent: Option<Uuid>) -> Option<User> {
        let outcome = self.allocate(order, exclude_agent, true).await;
        self.conclude(order, outcome, true)
    }

    /// All available agents annotated with their active-order count, busiest
    /// first. A monitoring view; selection does not use it.
    pub async fn workload(&self) -> Result<Vec<DriverWorkload>, StoreError> {
        let drivers = self.store.available_drivers().await?;
        let mut rows = Vec::with_capacity(drivers.len());
        for driver in drivers {
            let active_orders = self.store.active_delivery_count(driver.id).await?;
            rows.push(DriverWorkload {
                driver_id: driver.id,
                name: driver.name,
                email: driver.email,
                active_orders,
            });
        }
        rows.sort_by(|a, b| b.active_orders.cmp(&a.active_orders));
        Ok(rows)
    }

    async fn allocate(
        &self,
        order: &Order,
        exclude_agent: Option<Uuid>,
        reassignment: bool,
    ) -> AssignmentOutcome {
        let timer = self.metrics.assignment_duration.start_timer();
        let _gate = self.assign_gate.lock().await;
        let result = self.select_and_bind(order, exclude_agent, reassignment).await;
        timer.observe_duration();

        match result {
            Ok(Some(driver)) => AssignmentOutcome::Assigned(driver),
            Ok(None) => AssignmentOutcome::NoCandidate,
            Err(e) => AssignmentOutcome::Infrastructure(e),
        }
    }

    async fn select_and_bind(
        &self,
        order: &Order,
        exclude_agent: Option<Uuid>,
        reassignment: bool,
    ) -> Result<Option<User>, StoreError> {
        let mut candidates = self.store.available_drivers().await?;
        if let Some(excluded) = exclude_agent {
            candidates.retain(|driver| driver.id != excluded);
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut ranked = Vec::with_capacity(candidates.len());
        for driver in candidates {
            let load = self.store.active_delivery_count(driver.id).await?;
            ranked.push((load, driver));
        }
        // Least-loaded wins; ties go to the longest-registered driver so new
        // hires are not always favored.
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.created_at.cmp(&b.1.created_at)));
        let (load, driver) = ranked.swap_remove(0);

        self.store.assign_driver(order.id, driver.id).await?;

        let note = if reassignment {
            format!("Delivery reassigned to {}", driver.name)
        } else {
            format!("Delivery auto-assigned to {}", driver.name)
        };
        // History rows are attributed to the order's owner.
        self.store
            .append_status_history(StatusHistoryEntry::new(order, order.user_id, note))
            .await?;

        tracing::info!(
            order_id = %order.id,
            driver_id = %driver.id,
            driver = %driver.name,
            active_orders = load,
            reassignment = reassignment,
            "delivery agent bound to order"
        );
        Ok(Some(driver))
    }

    fn conclude(&self, order: &Order, outcome: AssignmentOutcome, reassignment: bool) -> Option<User> {
        match outcome {
            AssignmentOutcome::Assigned(driver) => {
                self.metrics
                    .assignments_total
                    .with_label_values(&["assigned"])
                    .inc();
                self.publish_assignment(order, &driver, reassignment);
                Some(driver)
            }
            AssignmentOutcome::NoCandidate => {
                self.metrics
                    .assignments_total
                    .with_label_values(&["no_candidate"])
                    .inc();
                tracing::warn!(
                    order_id = %order.id,
                    reassignment = reassignment,
                    "no available delivery agents; order remains unassigned"
                );
                None
            }
            AssignmentOutcome::Infrastructure(e) => {
                self.metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                self.metrics
                    .absorbed_failures_total
                    .with_label_values(&["assign"])
                    .inc();
                tracing::error!(
                    order_id = %order.id,
                    error = %e,
                    "assignment failed on infrastructure error; reported as no candidate"
                );
                None
            }
        }
    }

    /// Fire-and-forget: a dropped event never fails the assignment.
    fn publish_assignment(&self, order: &Order, driver: &User, reassignment: bool) {
        let notifier = self.notifier.clone();
        let event = AssignmentEvent {
            order_id: order.id,
            customer_id: order.user_id,
            driver_id: driver.id,
            reassignment,
            occurred_at: Utc::now(),
        };

        tokio::spawn(async move {
            let result = retry_with_backoff(RetryConfig::default(), |_attempt| {
                let notifier = notifier.clone();
                let event = event.clone();
                async move { notifier.publish(&event).await }
            })
            .await;

            if let RetryResult::Failed(e) = result {
                tracing::warn!(
                    order_id = %event.order_id,
                    error = %e,
                    "assignment event dropped after retries"
                );
            }
        });
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::DeliveryStatus;
    use crate::domain::user::{DriverStatus, MembershipTier, Role};
    use crate::events::ChannelNotifier;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn driver(name: &str, registered_days_ago: i64) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            role: Role::Delivery,
            driver_status: DriverStatus::Available,
            membership_tier: MembershipTier::None,
            points: 0,
            created_at: Utc::now() - Duration::days(registered_days_ago),
        }
    }

    fn pending_order(user_id: Uuid) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id,
            delivery_person_id: None,
            delivery_status: DeliveryStatus::Pending,
            total: Decimal::new(4500, 2),
            created_at: Utc::now(),
        }
    }

    fn active_order(user_id: Uuid, driver_id: Uuid, status: DeliveryStatus) -> Order {
        Order {
            delivery_person_id: Some(driver_id),
            delivery_status: status,
            ..pending_order(user_id)
        }
    }

    fn allocator(store: Arc<MemoryStore>) -> DeliveryAllocator<MemoryStore> {
        let notifier = Arc::new(ChannelNotifier::new(16));
        let metrics = Arc::new(Metrics::new().unwrap());
        DeliveryAllocator::new(store, notifier, metrics)
    }

    #[tokio::test]
    async fn test_least_loaded_driver_wins() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = Uuid::new_v4();

        let busy = driver("Amira", 30);
        let idle = driver("Ben", 10);
        let medium = driver("Chloe", 20);
        store.insert_user(busy.clone()).await;
        store.insert_user(idle.clone()).await;
        store.insert_user(medium.clone()).await;

        for _ in 0..2 {
            store
                .insert_order(active_order(customer_id, busy.id, DeliveryStatus::InTransit))
                .await;
        }
        store
            .insert_order(active_order(customer_id, medium.id, DeliveryStatus::Preparing))
            .await;

        let order = pending_order(customer_id);
        store.insert_order(order.clone()).await;

        let chosen = allocator(store.clone()).assign(&order).await.unwrap();
        assert_eq!(chosen.id, idle.id);
        assert_eq!(
            store.order(order.id).await.unwrap().delivery_person_id,
            Some(idle.id)
        );
    }

    #[tokio::test]
    async fn test_tie_breaks_to_oldest_registration() {
        let store = Arc::new(MemoryStore::new());
        let veteran = driver("Amira", 400);
        let rookie = driver("Ben", 3);
        store.insert_user(rookie.clone()).await;
        store.insert_user(veteran.clone()).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        let chosen = allocator(store).assign(&order).await.unwrap();
        assert_eq!(chosen.id, veteran.id);
    }

    #[tokio::test]
    async fn test_terminal_orders_do_not_count_as_load() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = Uuid::new_v4();

        let delivered_lots = driver("Amira", 100);
        let carrying_one = driver("Ben", 50);
        store.insert_user(delivered_lots.clone()).await;
        store.insert_user(carrying_one.clone()).await;

        for _ in 0..3 {
            store
                .insert_order(active_order(
                    customer_id,
                    delivered_lots.id,
                    DeliveryStatus::Delivered,
                ))
                .await;
        }
        store
            .insert_order(active_order(customer_id, carrying_one.id, DeliveryStatus::Pending))
            .await;

        let order = pending_order(customer_id);
        store.insert_order(order.clone()).await;

        let chosen = allocator(store).assign(&order).await.unwrap();
        assert_eq!(chosen.id, delivered_lots.id);
    }

    #[tokio::test]
    async fn test_no_available_drivers_returns_none_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut off_duty = driver("Amira", 10);
        off_duty.driver_status = DriverStatus::OffDuty;
        store.insert_user(off_duty).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        assert!(allocator(store.clone()).assign(&order).await.is_none());
        assert_eq!(store.order(order.id).await.unwrap().delivery_person_id, None);
        assert!(store.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_drivers_are_not_candidates() {
        let store = Arc::new(MemoryStore::new());
        let mut busy = driver("Amira", 60);
        busy.driver_status = DriverStatus::Busy;
        let available = driver("Ben", 5);
        store.insert_user(busy).await;
        store.insert_user(available.clone()).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        let chosen = allocator(store).assign(&order).await.unwrap();
        assert_eq!(chosen.id, available.id);
    }

    #[tokio::test]
    async fn test_assignment_appends_history_attributed_to_customer() {
        let store = Arc::new(MemoryStore::new());
        let agent = driver("Amira", 10);
        store.insert_user(agent.clone()).await;

        let customer_id = Uuid::new_v4();
        let order = pending_order(customer_id);
        store.insert_order(order.clone()).await;

        allocator(store.clone()).assign(&order).await.unwrap();

        let history = store.history().await;
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.order_id, order.id);
        // Assignment does not advance the status; the row snapshots it.
        assert_eq!(entry.delivery_status, DeliveryStatus::Pending);
        assert_eq!(entry.changed_by, customer_id);
        assert!(entry.notes.as_deref().unwrap().contains("auto-assigned"));
    }

    #[tokio::test]
    async fn test_reassign_excludes_prior_agent() {
        let store = Arc::new(MemoryStore::new());
        let first = driver("Amira", 90);
        let second = driver("Ben", 40);
        store.insert_user(first.clone()).await;
        store.insert_user(second.clone()).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        let alloc = allocator(store.clone());
        let chosen = alloc.assign(&order).await.unwrap();
        assert_eq!(chosen.id, first.id);

        let replacement = alloc.reassign(&order, Some(first.id)).await.unwrap();
        assert_eq!(replacement.id, second.id);
        assert_eq!(
            store.order(order.id).await.unwrap().delivery_person_id,
            Some(second.id)
        );

        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert!(history[1].notes.as_deref().unwrap().contains("reassigned"));
    }

    #[tokio::test]
    async fn test_reassign_with_single_excluded_candidate_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let only = driver("Amira", 10);
        store.insert_user(only.clone()).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        let result = allocator(store).reassign(&order, Some(only.id)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_workload_sorted_busiest_first() {
        let store = Arc::new(MemoryStore::new());
        let customer_id = Uuid::new_v4();

        let light = driver("Amira", 10);
        let heavy = driver("Ben", 20);
        store.insert_user(light.clone()).await;
        store.insert_user(heavy.clone()).await;

        store
            .insert_order(active_order(customer_id, light.id, DeliveryStatus::Pending))
            .await;
        for _ in 0..3 {
            store
                .insert_order(active_order(customer_id, heavy.id, DeliveryStatus::InTransit))
                .await;
        }

        let workload = allocator(store).workload().await.unwrap();
        assert_eq!(workload.len(), 2);
        assert_eq!(workload[0].driver_id, heavy.id);
        assert_eq!(workload[0].active_orders, 3);
        assert_eq!(workload[1].driver_id, light.id);
        assert_eq!(workload[1].active_orders, 1);
    }

    // Store whose reads fail: drives the infrastructure-error branch.
    struct BrokenStore;

    #[async_trait]
    impl FleetStore for BrokenStore {
        async fn available_drivers(&self) -> Result<Vec<User>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn active_delivery_count(&self, _driver_id: Uuid) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn assign_driver(&self, _order_id: Uuid, _driver_id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn append_status_history(
            &self,
            _entry: StatusHistoryEntry,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_infrastructure_error_downgrades_to_none() {
        let notifier = Arc::new(ChannelNotifier::new(4));
        let metrics = Arc::new(Metrics::new().unwrap());
        let alloc = DeliveryAllocator::new(Arc::new(BrokenStore), notifier, metrics.clone());

        let order = pending_order(Uuid::new_v4());
        assert!(alloc.assign(&order).await.is_none());
        assert_eq!(
            metrics
                .assignments_total
                .with_label_values(&["error"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_assignment_event_published() {
        let store = Arc::new(MemoryStore::new());
        let agent = driver("Amira", 10);
        store.insert_user(agent.clone()).await;

        let order = pending_order(Uuid::new_v4());
        store.insert_order(order.clone()).await;

        let notifier = Arc::new(ChannelNotifier::new(16));
        let mut rx = notifier.subscribe();
        let metrics = Arc::new(Metrics::new().unwrap());
        let alloc = DeliveryAllocator::new(store, notifier, metrics);

        alloc.assign(&order).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.driver_id, agent.id);
        assert!(!event.reassignment);
    }
}

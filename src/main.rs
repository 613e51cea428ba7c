use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use bakery_fulfillment::config::AppConfig;
use bakery_fulfillment::domain::delivery::DeliveryAllocator;
use bakery_fulfillment::domain::loyalty::{redemption_discount, LoyaltyLedger};
use bakery_fulfillment::domain::order::{DeliveryStatus, Order};
use bakery_fulfillment::domain::user::{DriverStatus, MembershipTier, Role, User};
use bakery_fulfillment::events::ChannelNotifier;
use bakery_fulfillment::metrics::{start_metrics_server, Metrics};
use bakery_fulfillment::store::{LedgerStore, MemoryStore, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bakery_fulfillment=debug")),
        )
        .init();

    tracing::info!("starting bakery fulfillment core");

    let config = AppConfig::load();

    // === 1. Metrics registry + scrape endpoint ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("metrics runtime");
        rt.block_on(async {
            if let Err(e) = start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("metrics server error: {}", e);
            }
        });
    });

    // === 2. Stores ===
    // The walkthrough below runs on the in-process store. When DATABASE_URL
    // is set, the Postgres schema is bootstrapped too, so the service store
    // is ready for the real request layer.
    if let Some(url) = &config.database_url {
        tracing::info!("bootstrapping postgres store");
        let pg = PostgresStore::connect(url).await?;
        pg.migrate().await?;
    } else {
        tracing::debug!("DATABASE_URL not set; running with the in-memory store only");
    }
    let store = Arc::new(MemoryStore::new());

    // === 3. Notifier + services ===
    let notifier = Arc::new(ChannelNotifier::new(16));
    let mut assignment_rx = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = assignment_rx.recv().await {
            tracing::info!(
                order_id = %event.order_id,
                driver_id = %event.driver_id,
                reassignment = event.reassignment,
                "downstream consumer saw assignment event"
            );
        }
    });

    let allocator = DeliveryAllocator::new(store.clone(), notifier, metrics.clone());
    let ledger = LoyaltyLedger::new(store.clone(), metrics.clone());

    // === 4. Seed a small fleet and a customer ===
    let now = Utc::now();
    let seed_driver = |name: &str, email: &str, days_ago: i64| User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        role: Role::Delivery,
        driver_status: DriverStatus::Available,
        membership_tier: MembershipTier::None,
        points: 0,
        created_at: now - Duration::days(days_ago),
    };

    let amira = seed_driver("Amira", "amira@bakery.test", 420);
    let ben = seed_driver("Ben", "ben@bakery.test", 200);
    let chloe = seed_driver("Chloe", "chloe@bakery.test", 30);
    for driver in [&amira, &ben, &chloe] {
        store.insert_user(driver.clone()).await;
    }

    let customer = User {
        id: Uuid::new_v4(),
        name: "Nadia".to_string(),
        email: "nadia@example.com".to_string(),
        role: Role::Client,
        driver_status: DriverStatus::OffDuty,
        membership_tier: MembershipTier::Vip,
        points: 0,
        created_at: now - Duration::days(90),
    };
    store.insert_user(customer.clone()).await;

    // Existing workload: Amira is carrying two deliveries, Ben one.
    for (driver_id, status) in [
        (amira.id, DeliveryStatus::InTransit),
        (amira.id, DeliveryStatus::Preparing),
        (ben.id, DeliveryStatus::Pending),
    ] {
        store
            .insert_order(Order {
                id: Uuid::new_v4(),
                user_id: customer.id,
                delivery_person_id: Some(driver_id),
                delivery_status: status,
                total: Decimal::new(1850, 2),
                created_at: now,
            })
            .await;
    }

    // === 5. Assign a fresh order ===
    let order = Order {
        id: Uuid::new_v4(),
        user_id: customer.id,
        delivery_person_id: None,
        delivery_status: DeliveryStatus::Pending,
        total: Decimal::new(100000, 2), // 1000.00
        created_at: now,
    };
    store.insert_order(order.clone()).await;

    let assigned_driver = allocator.assign(&order).await;
    match &assigned_driver {
        Some(driver) => tracing::info!(driver = %driver.name, "order assigned"),
        None => tracing::warn!("order left unassigned"),
    }

    // === 6. Earn points after payment capture ===
    ledger.process_order_earn(&order).await;
    let summary = ledger.user_balance(customer.id).await?;
    tracing::info!(
        earned = summary.earned,
        available = summary.available,
        expiring_soon = summary.expiring_soon,
        "customer balance after earning"
    );

    // === 7. Redeem on the next order, then cancel and refund it ===
    let next_order = Order {
        id: Uuid::new_v4(),
        user_id: customer.id,
        delivery_person_id: None,
        delivery_status: DeliveryStatus::Pending,
        total: Decimal::new(8000, 2), // 80.00
        created_at: Utc::now(),
    };
    store.insert_order(next_order.clone()).await;

    let discount = redemption_discount(60, next_order.total);
    tracing::info!(discount = %discount, "checkout previewed redemption");

    let paying_customer = User {
        points: store.points_balance(customer.id).await?,
        ..customer.clone()
    };
    ledger
        .redeem_for_order(&paying_customer, 60, &next_order)
        .await?;
    tracing::info!(
        balance = store.points_balance(customer.id).await?,
        "points redeemed at checkout"
    );

    ledger.refund_for_order(&next_order).await?;
    tracing::info!(
        balance = store.points_balance(customer.id).await?,
        "order cancelled, redemption refunded"
    );

    // === 8. Reassignment after the chosen driver declines ===
    let declined = assigned_driver.map(|driver| driver.id);
    if let Some(declined_id) = declined {
        store
            .set_driver_status(declined_id, DriverStatus::Busy)
            .await?;
    }
    if let Some(replacement) = allocator.reassign(&order, declined).await {
        tracing::info!(driver = %replacement.name, "order reassigned");
    }

    // === 9. Expiry sweep + workload view ===
    let expired = ledger.expire_outstanding().await?;
    tracing::info!(expired = expired, "expiry sweep finished");

    for row in allocator.workload().await? {
        tracing::info!(
            driver = %row.name,
            active_orders = row.active_orders,
            "fleet workload"
        );
    }

    // Give the event consumer a moment to drain, then exit.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tracing::info!("demo complete");

    Ok(())
}

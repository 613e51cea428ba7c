// Private module declaration
mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Delivery assignment outcomes and latency
// - Ledger entry throughput by kind
// - Points removed by the expiry sweep
// - Failures absorbed at the service boundary (earn, assign, expire)
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the fulfillment core
pub struct Metrics {
    registry: Registry,

    // Allocator Metrics
    pub assignments_total: IntCounterVec,
    pub assignment_duration: Histogram,

    // Ledger Metrics
    pub ledger_entries_total: IntCounterVec,
    pub points_expired_total: IntCounter,

    // Failures downgraded to logs on absorb-paths
    pub absorbed_failures_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Allocator Metrics
        let assignments_total = IntCounterVec::new(
            Opts::new(
                "delivery_assignments_total",
                "Delivery assignment attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(assignments_total.clone()))?;

        let assignment_duration = Histogram::with_opts(
            HistogramOpts::new(
                "delivery_assignment_duration_seconds",
                "Time spent selecting and binding a delivery agent",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(assignment_duration.clone()))?;

        // Ledger Metrics
        let ledger_entries_total = IntCounterVec::new(
            Opts::new(
                "loyalty_ledger_entries_total",
                "Ledger entries recorded by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(ledger_entries_total.clone()))?;

        let points_expired_total = IntCounter::new(
            "loyalty_points_expired_total",
            "Total points removed by the expiry sweep",
        )?;
        registry.register(Box::new(points_expired_total.clone()))?;

        let absorbed_failures_total = IntCounterVec::new(
            Opts::new(
                "absorbed_failures_total",
                "Infrastructure failures absorbed at the service boundary",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(absorbed_failures_total.clone()))?;

        Ok(Self {
            registry,
            assignments_total,
            assignment_duration,
            ledger_entries_total,
            points_expired_total,
            absorbed_failures_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_increment() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry().gather().is_empty());

        metrics
            .assignments_total
            .with_label_values(&["assigned"])
            .inc();
        metrics
            .ledger_entries_total
            .with_label_values(&["earned"])
            .inc();
        metrics.points_expired_total.inc_by(42);

        assert_eq!(
            metrics
                .assignments_total
                .with_label_values(&["assigned"])
                .get(),
            1
        );
        assert_eq!(metrics.points_expired_total.get(), 42);
    }

    #[test]
    fn test_registries_are_independent() {
        // Each service instance carries its own registry; no global state.
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.points_expired_total.inc_by(5);
        assert_eq!(b.points_expired_total.get(), 0);
    }
}

//! Routing progress tracking

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use trishul_common::StageRole;

/// Counters snapshot returned by [`RoutingProgress::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub passes: u64,
    pub items_routed: u64,
    pub deliveries: u64,
    pub failures: u64,
    pub fatal_failures: u64,
}

#[derive(Debug, Default)]
pub struct RoutingProgress {
    passes: AtomicU64,
    routed: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    fatal: AtomicU64,
}

impl RoutingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self, producer: StageRole) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        trishul_telemetry::record_routed(producer.as_str());
    }

    pub fn record_delivery(&self, consumer: StageRole) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        trishul_telemetry::record_delivery(consumer.as_str());
    }

    pub fn record_failure(&self, stage: StageRole, fatal: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if fatal {
            self.fatal.fetch_add(1, Ordering::Relaxed);
        }
        trishul_telemetry::record_failure(stage.as_str(), fatal);
    }

    pub fn snapshot(&self) -> RouteStats {
        RouteStats {
            passes: self.passes.load(Ordering::Relaxed),
            items_routed: self.routed.load(Ordering::Relaxed),
            deliveries: self.delivered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fatal_failures: self.fatal.load(Ordering::Relaxed),
        }
    }

    pub fn print_summary(&self) {
        let stats = self.snapshot();
        info!("Routing Summary:");
        info!("  Polling passes: {}", stats.passes);
        info!("  Items routed: {}", stats.items_routed);
        info!("  Deliveries: {}", stats.deliveries);
        info!("  Failure reports: {} ({} fatal)", stats.failures, stats.fatal_failures);
    }
}

//! Telemetry - metric names and recording helpers
//!
//! Counters are no-ops until a recorder is installed, e.g. with
//! [`install_prometheus`].

use anyhow::{Context, Result};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub const ITEMS_ROUTED: &str = "trishul_items_routed_total";
pub const DELIVERIES: &str = "trishul_deliveries_total";
pub const FAILURE_REPORTS: &str = "trishul_failure_reports_total";
pub const PRODUCERS_SETTLED: &str = "trishul_producers_settled_total";
pub const HTTP_REQUESTS: &str = "trishul_http_requests_total";

/// Register descriptions for every counter.
pub fn describe_metrics() {
    describe_counter!(ITEMS_ROUTED, "Work items received from producer stages");
    describe_counter!(DELIVERIES, "Work items delivered to consumer stages");
    describe_counter!(FAILURE_REPORTS, "Failure reports forwarded to the exception sink");
    describe_counter!(PRODUCERS_SETTLED, "Producer stages observed finished or force-ended");
    describe_counter!(HTTP_REQUESTS, "HTTP requests sent by the transport");
}

/// Serve metrics over HTTP at `addr`. Must run inside a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on {}", addr))?;
    describe_metrics();
    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

#[inline]
pub fn record_routed(producer: &'static str) {
    counter!(ITEMS_ROUTED, "producer" => producer).increment(1);
}

#[inline]
pub fn record_delivery(consumer: &'static str) {
    counter!(DELIVERIES, "consumer" => consumer).increment(1);
}

#[inline]
pub fn record_failure(stage: &'static str, fatal: bool) {
    let severity = if fatal { "fatal" } else { "recoverable" };
    counter!(FAILURE_REPORTS, "stage" => stage, "severity" => severity).increment(1);
}

#[inline]
pub fn record_settled(producer: &'static str, kind: &'static str) {
    counter!(PRODUCERS_SETTLED, "producer" => producer, "kind" => kind).increment(1);
}

#[inline]
pub fn record_http_request(method: &'static str) {
    counter!(HTTP_REQUESTS, "method" => method).increment(1);
}

//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, leases, stage errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_leases_total` (counter): lease/release events by strategy
//! - `gateway_stage_errors_total` (counter): short-circuits by stage and error code
//! - `gateway_cache_lookups_total` (counter): output cache hits and misses by route
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels for route, stage, error code; never per-request values

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Record a lease or release by a balancer.
pub fn record_lease(strategy: &'static str, event: &'static str) {
    counter!("gateway_leases_total", "strategy" => strategy, "event" => event).increment(1);
}

/// Record an output cache lookup.
pub fn record_cache(route: &str, outcome: &'static str) {
    counter!("gateway_cache_lookups_total", "route" => route.to_string(), "outcome" => outcome).increment(1);
}

/// Record a pipeline short-circuit.
pub fn record_stage_error(stage: &'static str, code: &'static str) {
    counter!("gateway_stage_errors_total", "stage" => stage, "code" => code).increment(1);
}

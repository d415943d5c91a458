// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the transport layer.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of backend connections currently open.
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("gatewire_open_connections", "Number of currently open backend connections.").unwrap();
    /// The number of objects held by the object cache across all types.
    pub static ref CACHED_OBJECTS: Gauge =
        register_gauge!("gatewire_cached_objects", "Number of backend objects mirrored in the object cache.").unwrap();

    // --- Counters ---
    /// The total number of request round trips started.
    pub static ref REQUESTS_TOTAL: Counter =
        register_counter!("gatewire_requests_total", "Total number of backend requests issued.").unwrap();
    /// The total number of requests that expired before a reply arrived.
    pub static ref REQUEST_TIMEOUTS_TOTAL: Counter =
        register_counter!("gatewire_request_timeouts_total", "Total number of backend requests that timed out.").unwrap();
    /// Replies (or pushes) that matched no in-flight request.
    pub static ref UNMATCHED_REPLIES_TOTAL: Counter =
        register_counter!("gatewire_unmatched_replies_total", "Total number of received messages with no registered handler.").unwrap();
    /// Sessions retired after the backend reported a duplicate login.
    pub static ref POISONED_SESSIONS_TOTAL: Counter =
        register_counter!("gatewire_poisoned_sessions_total", "Total number of sessions poisoned by a duplicate login.").unwrap();

    // --- Histograms ---
    /// A histogram of end-to-end request latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("gatewire_request_latency_seconds", "Latency of backend round trips in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

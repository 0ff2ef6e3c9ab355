//! Prometheus metrics for the bridge.
//!
//! - Connection lifecycle (active, opened, closed, rejected, duration)
//! - Inbound events by kind
//! - Outbound commands by kind, deliveries, drops and failures

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, InboundMetrics, RouterMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "bridge";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of live connections in the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of live connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections registered"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections torn down"
    ).unwrap();

    /// Connections refused because the limit was reached
    pub static ref CONNECTIONS_REJECTED: IntCounter = register_int_counter!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connections rejected at capacity"
    ).unwrap();

    pub static ref TRANSPORT_ERRORS: IntCounter = register_int_counter!(
        format!("{}_transport_errors_total", METRIC_PREFIX),
        "Total transport faults (excluding ordinary closure)"
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 86400.0]
    ).unwrap();

    // ============================================================================
    // Inbound Metrics
    // ============================================================================

    pub static ref INBOUND_EVENTS: IntCounterVec = register_int_counter_vec!(
        format!("{}_inbound_events_total", METRIC_PREFIX),
        "Inbound events handed to the application",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Outbound Metrics
    // ============================================================================

    pub static ref OUTBOUND_COMMANDS: IntCounterVec = register_int_counter_vec!(
        format!("{}_outbound_commands_total", METRIC_PREFIX),
        "Outbound commands received from the application",
        &["kind"]
    ).unwrap();

    pub static ref SENDS_DELIVERED: IntCounter = register_int_counter!(
        format!("{}_sends_delivered_total", METRIC_PREFIX),
        "Payloads queued on a live connection"
    ).unwrap();

    /// Commands whose target was already gone
    pub static ref SENDS_DROPPED: IntCounter = register_int_counter!(
        format!("{}_sends_dropped_total", METRIC_PREFIX),
        "Commands dropped because the target connection no longer exists"
    ).unwrap();

    pub static ref SENDS_FAILED: IntCounter = register_int_counter!(
        format!("{}_sends_failed_total", METRIC_PREFIX),
        "Per-connection send failures"
    ).unwrap();
}

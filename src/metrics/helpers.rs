//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED, CONNECTIONS_REJECTED,
    CONNECTION_DURATION, INBOUND_EVENTS, OUTBOUND_COMMANDS, SENDS_DELIVERED, SENDS_DROPPED,
    SENDS_FAILED, TRANSPORT_ERRORS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_rejected() {
        CONNECTIONS_REJECTED.inc();
    }

    pub fn record_transport_error() {
        TRANSPORT_ERRORS.inc();
    }
}

/// Helper struct for recording inbound event metrics
pub struct InboundMetrics;

impl InboundMetrics {
    pub fn record(kind: &str) {
        INBOUND_EVENTS.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for recording router metrics
pub struct RouterMetrics;

impl RouterMetrics {
    pub fn record_command(kind: &str) {
        OUTBOUND_COMMANDS.with_label_values(&[kind]).inc();
    }

    pub fn record_delivered(count: u64) {
        SENDS_DELIVERED.inc_by(count);
    }

    pub fn record_dropped(count: u64) {
        SENDS_DROPPED.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        SENDS_FAILED.inc_by(count);
    }
}

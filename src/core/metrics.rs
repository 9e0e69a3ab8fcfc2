// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the messaging core.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process, however many sessions are created.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, IntGauge, TextEncoder, register_counter, register_counter_vec,
    register_int_gauge,
};

/// Anomaly label for a response or error frame naming no pending conversation.
pub const ANOMALY_UNKNOWN_TOKEN: &str = "unknown_token";
/// Anomaly label for a response attempted on a handle the core does not track.
pub const ANOMALY_UNKNOWN_HANDLE: &str = "unknown_handle";
/// Anomaly label for an inbound frame that arrived after the session closed.
pub const ANOMALY_FRAME_AFTER_CLOSE: &str = "frame_after_close";
/// Anomaly label for an inbound request on a path with no request stream.
pub const ANOMALY_UNROUTABLE_REQUEST: &str = "unroutable_request";

lazy_static! {
    // --- Counters ---
    /// Protocol anomalies that were dropped rather than surfaced to callers.
    pub static ref ANOMALIES_TOTAL: CounterVec =
        register_counter_vec!("topicwire_anomalies_total", "Dropped protocol anomalies, labeled by kind.", &["kind"]).unwrap();
    /// Value updates delivered to value stream handlers.
    pub static ref VALUE_UPDATES_DISPATCHED_TOTAL: Counter =
        register_counter!("topicwire_value_updates_dispatched_total", "Total number of value updates delivered to handlers.").unwrap();
    /// Value updates that could not be decoded for a subscription.
    pub static ref VALUE_DECODE_FAILURES_TOTAL: Counter =
        register_counter!("topicwire_value_decode_failures_total", "Total number of value updates that failed to decode.").unwrap();
    /// Caller-supplied handlers that returned an error or panicked.
    pub static ref HANDLER_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("topicwire_handler_failures_total", "Total number of failed handler invocations, labeled by handler kind.", &["handler"]).unwrap();
    /// Conversations resolved, labeled by how they ended.
    pub static ref CONVERSATIONS_RESOLVED_TOTAL: CounterVec =
        register_counter_vec!("topicwire_conversations_resolved_total", "Total number of resolved conversations, labeled by outcome.", &["outcome"]).unwrap();

    // --- Gauges ---
    /// Conversations currently awaiting a response across all sessions.
    pub static ref PENDING_CONVERSATIONS: IntGauge =
        register_int_gauge!("topicwire_pending_conversations", "Number of conversations awaiting a response.").unwrap();
}

/// Records one dropped anomaly of the given kind.
pub fn record_anomaly(kind: &str) {
    ANOMALIES_TOTAL.with_label_values(&[kind]).inc();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

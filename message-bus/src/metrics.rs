//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total messages published
    pub static ref MESSAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_publish_total",
        "Total messages published",
        &["message_type", "status"]
    )
    .unwrap();

    /// Message publish duration
    pub static ref MESSAGE_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_publish_duration_seconds",
        "Message publish duration in seconds",
        &["message_type"]
    )
    .unwrap();

    /// Total messages received off the wire
    pub static ref MESSAGE_RECEIVE_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_receive_total",
        "Total messages received",
        &["subject", "status"]
    )
    .unwrap();

    /// Messages offered to idempotent consumers, by outcome
    pub static ref MESSAGE_CONSUME_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_consume_total",
        "Messages offered to idempotent consumers",
        &["message_type", "outcome"]
    )
    .unwrap();

    /// Handler failures
    pub static ref MESSAGE_HANDLER_FAILURES: CounterVec = register_counter_vec!(
        "message_bus_handler_failures_total",
        "Message handler failures",
        &["message_type"]
    )
    .unwrap();

    /// Message processing duration
    pub static ref MESSAGE_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_process_duration_seconds",
        "Message processing duration in seconds",
        &["message_type"]
    )
    .unwrap();
}

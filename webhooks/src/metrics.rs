//! Webhook metrics

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static::lazy_static! {
    /// Delivery attempts by event type and outcome
    pub static ref WEBHOOK_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "webhook_attempts_total",
        "Total webhook delivery attempts",
        &["event_type", "outcome"]
    )
    .unwrap();

    /// Attempt latency
    pub static ref WEBHOOK_ATTEMPT_DURATION: HistogramVec = register_histogram_vec!(
        "webhook_attempt_duration_seconds",
        "Webhook delivery attempt duration",
        &["event_type"]
    )
    .unwrap();

    /// Deliveries that reached `Delivered` or `Failed`
    pub static ref WEBHOOK_DELIVERIES_FINISHED: CounterVec = register_counter_vec!(
        "webhook_deliveries_finished_total",
        "Deliveries reaching a final status",
        &["status"]
    )
    .unwrap();
}

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Case lifecycle
    pub static ref CASES_CREATED: IntCounterVec = register_int_counter_vec!(
        "kyc_cases_created_total",
        "Onboarding cases created",
        &["entity_type"]
    )
    .expect("metric can be created");

    pub static ref CASE_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "kyc_case_transitions_total",
        "Case status transitions",
        &["from", "to"]
    )
    .expect("metric can be created");

    pub static ref DOCUMENTS_REVIEWED: IntCounterVec = register_int_counter_vec!(
        "kyc_documents_reviewed_total",
        "Document review decisions",
        &["decision"]
    )
    .expect("metric can be created");

    // Work queue
    pub static ref WORK_ITEMS_ASSIGNED: IntCounterVec = register_int_counter_vec!(
        "kyc_work_items_assigned_total",
        "Work item assignments",
        &["mode"]
    )
    .expect("metric can be created");

    pub static ref QUEUED_WORK_ITEMS: IntGauge = register_int_gauge!(
        "kyc_queued_work_items",
        "Work items waiting for a reviewer at the last auto-assignment run"
    )
    .expect("metric can be created");

    // Audit + notifications
    pub static ref AUDIT_ENTRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kyc_audit_entries_total",
        "Audit log entries appended",
        &["action"]
    )
    .expect("metric can be created");

    pub static ref WEBHOOK_DELIVERIES_ENQUEUED: IntCounterVec = register_int_counter_vec!(
        "kyc_webhook_deliveries_enqueued_total",
        "Webhook deliveries created",
        &["event_type"]
    )
    .expect("metric can be created");

    // NATS
    pub static ref EVENTS_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "kyc_events_published_total",
        "Domain events published to NATS",
        &["event_type", "status"]
    )
    .expect("metric can be created");

    pub static ref DB_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "kyc_db_transaction_duration_seconds",
        "Duration of service database transactions",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .expect("metric can be created");
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

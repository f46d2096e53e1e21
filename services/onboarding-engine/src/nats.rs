use crate::metrics::EVENTS_PUBLISHED;
use message_bus::{Envelope, Publisher};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes domain events under `<prefix>.<event type>`
///
/// Events go out after the owning transaction commits. Failures are logged
/// and counted, never returned: webhook deliveries are the durable record.
pub struct EventPublisher {
    publisher: Publisher,
}

impl EventPublisher {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    pub fn subject(&self, event_type: &str) -> String {
        self.publisher.subject(event_type)
    }

    pub async fn publish<T: Serialize>(&self, event_type: &str, tenant_id: Uuid, payload: T) {
        let envelope = Envelope::new(event_type, payload).with_tenant(tenant_id);

        match self.publisher.publish(event_type, &envelope).await {
            Ok(()) => {
                debug!("Published {} ({})", event_type, envelope.message_id);
                EVENTS_PUBLISHED.with_label_values(&[event_type, "ok"]).inc();
            }
            Err(e) => {
                error!("Failed to publish {} event: {}", event_type, e);
                EVENTS_PUBLISHED.with_label_values(&[event_type, "error"]).inc();
            }
        }
    }
}

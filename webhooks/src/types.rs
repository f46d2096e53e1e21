//! Shared types for webhook delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant-registered receiver of webhook events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Endpoint ID
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Target URL
    pub url: String,
    /// HMAC signing secret
    #[serde(skip_serializing)]
    pub secret: String,
    /// Subscribed event types (empty or `*` means all)
    pub event_types: Vec<String>,
    /// Disabled endpoints receive nothing
    pub active: bool,
}

impl WebhookEndpoint {
    /// Whether this endpoint wants `event_type`
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.active
            && (self.event_types.is_empty()
                || self.event_types.iter().any(|t| t == "*" || t == event_type))
    }
}

/// A domain event fanned out to endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID
    pub id: Uuid,
    /// Event type (e.g. `case.status_changed`)
    pub event_type: String,
    /// Tenant the event belongs to
    pub tenant_id: Uuid,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
    /// Event body
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Create a new event
    pub fn new(event_type: impl Into<String>, tenant_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            tenant_id,
            occurred_at: Utc::now(),
            data,
        }
    }

    /// Request body sent to receivers
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "tenant_id": self.tenant_id,
            "occurred_at": self.occurred_at,
            "data": self.data,
        })
    }
}

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for the next attempt
    Pending,
    /// Receiver answered 2xx
    Delivered,
    /// Rejected or out of attempts
    Failed,
}

impl DeliveryStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {}", other)),
        }
    }
}

/// One event bound for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Delivery ID
    pub id: Uuid,
    /// Target endpoint
    pub endpoint_id: Uuid,
    /// Source event
    pub event_id: Uuid,
    /// Event type
    pub event_type: String,
    /// Body sent on every attempt
    pub payload: serde_json::Value,
    /// Status
    pub status: DeliveryStatus,
    /// Attempts made so far
    pub attempt_count: u32,
    /// When the next attempt is due (pending only)
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last HTTP status seen
    pub last_status_code: Option<u16>,
    /// Last transport or HTTP error
    pub last_error: Option<String>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Delivered at
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// New pending delivery, due immediately
    pub fn new(endpoint: &WebhookEndpoint, event: &WebhookEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            endpoint_id: endpoint.id,
            event_id: event.id,
            event_type: event.event_type.clone(),
            payload: event.payload(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            next_attempt_at: Some(now),
            last_status_code: None,
            last_error: None,
            created_at: now,
            delivered_at: None,
        }
    }

    /// Still waiting for an attempt
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }
}

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx
    Delivered(u16),
    /// 400/401/403, never retried
    Rejected(u16),
    /// Worth retrying later
    Retryable {
        /// HTTP status, absent on transport failure
        status: Option<u16>,
        /// Description
        error: String,
    },
}

impl AttemptOutcome {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Delivered(_) => "delivered",
            AttemptOutcome::Rejected(_) => "rejected",
            AttemptOutcome::Retryable { .. } => "retryable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(event_types: &[&str]) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url: "https://partner.example/hooks".into(),
            secret: "s".into(),
            event_types: event_types.iter().map(|s| s.to_string()).collect(),
            active: true,
        }
    }

    #[test]
    fn test_subscriptions() {
        assert!(endpoint(&[]).subscribes_to("case.status_changed"));
        assert!(endpoint(&["*"]).subscribes_to("document.reviewed"));
        assert!(endpoint(&["case.status_changed"]).subscribes_to("case.status_changed"));
        assert!(!endpoint(&["case.status_changed"]).subscribes_to("document.reviewed"));

        let mut inactive = endpoint(&[]);
        inactive.active = false;
        assert!(!inactive.subscribes_to("case.status_changed"));
    }

    #[test]
    fn test_new_delivery_is_due() {
        let ep = endpoint(&[]);
        let event = WebhookEvent::new("case.status_changed", ep.tenant_id, serde_json::json!({}));
        let delivery = WebhookDelivery::new(&ep, &event);

        assert!(delivery.is_pending());
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.next_attempt_at.is_some());
        assert_eq!(delivery.payload["type"], "case.status_changed");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
    }
}

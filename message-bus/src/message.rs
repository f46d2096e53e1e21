//! Message envelope for pub/sub

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    /// Message ID, the idempotency key for consumers
    pub message_id: Uuid,

    /// Message type (e.g. `kyc.case.status_changed`)
    pub message_type: String,

    /// Owning tenant
    #[serde(default)]
    pub tenant_id: Option<Uuid>,

    /// When the event happened
    pub occurred_at: DateTime<Utc>,

    /// Correlation ID (for tracing)
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Payload
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Create new envelope with a fresh message id
    pub fn new(message_type: impl Into<String>, payload: T) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            message_type: message_type.into(),
            tenant_id: None,
            occurred_at: Utc::now(),
            correlation_id: None,
            payload,
        }
    }

    /// Set tenant
    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Erase the payload type
    pub fn into_value(self) -> crate::Result<Envelope<serde_json::Value>> {
        Ok(Envelope {
            message_id: self.message_id,
            message_type: self.message_type,
            tenant_id: self.tenant_id,
            occurred_at: self.occurred_at,
            correlation_id: self.correlation_id,
            payload: serde_json::to_value(self.payload)?,
        })
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Envelope<serde_json::Value> {
    /// Decode the payload into a concrete type
    pub fn decode_payload<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

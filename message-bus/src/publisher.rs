//! Message publisher with retry logic

use crate::{
    message::Envelope,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    Error, Result,
};
use async_nats::{Client, HeaderMap};
use bytes::Bytes;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Prefix prepended to every subject (e.g. `kyc`)
    pub subject_prefix: String,

    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "kyc".to_string(),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Message publisher
#[derive(Clone)]
pub struct Publisher {
    client: Client,
    config: PublisherConfig,
}

impl Publisher {
    /// Create new publisher
    pub fn new(client: Client, config: PublisherConfig) -> Self {
        Self { client, config }
    }

    /// Connect to NATS and create a publisher
    pub async fn connect(url: &str, config: PublisherConfig) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!("Connected to NATS: {}", url);
        Ok(Self::new(client, config))
    }

    /// Underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Full subject for a relative one
    pub fn subject(&self, relative: &str) -> String {
        if self.config.subject_prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}.{}", self.config.subject_prefix, relative)
        }
    }

    /// Publish an envelope on `prefix.relative_subject`
    pub async fn publish<T: Serialize>(&self, relative_subject: &str, envelope: &Envelope<T>) -> Result<()> {
        let start = Instant::now();
        let subject = self.subject(relative_subject);
        let payload = Bytes::from(envelope.to_bytes()?);

        debug!("Publishing message {} to subject: {}", envelope.message_id, subject);

        let result = self
            .publish_with_retry(&subject, envelope.message_id.to_string(), payload)
            .await;

        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[envelope.message_type.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[envelope.message_type.as_str(), status])
            .inc();

        result
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, subject: &str, message_id: String, payload: Bytes) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            let mut headers = HeaderMap::new();
            headers.insert("Nats-Msg-Id", message_id.as_str());

            match self
                .client
                .publish_with_headers(subject.to_string(), headers, payload.clone())
                .await
            {
                Ok(()) => {
                    if attempts > 1 {
                        info!("Message {} published after {} attempts", message_id, attempts);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!("Failed to publish {} after {} attempts: {}", message_id, attempts, e);
                        return Err(Error::Publish(e.to_string()));
                    }

                    warn!(
                        "Publish failed (attempt {}), retrying in {:?}: {}",
                        attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.subject_prefix, "kyc");
        assert_eq!(config.max_retry_attempts, 3);
        assert!(config.initial_retry_delay < config.max_retry_delay);
    }
}

//! Idempotent message consumption
//!
//! Each message is processed at most once per `processed_ttl`:
//! 1. a processed marker short-circuits redeliveries
//! 2. a set-if-not-exists lock keyed by message id guards concurrent deliveries
//! 3. the marker is written only after the handler succeeds
//! 4. the lock is released on success and on failure so a failed message can be retried

use crate::{
    idempotency::IdempotencyStore,
    message::Envelope,
    metrics::{MESSAGE_CONSUME_TOTAL, MESSAGE_HANDLER_FAILURES, MESSAGE_PROCESS_DURATION},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle incoming message
    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

/// Idempotency configuration
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Key namespace, usually the consuming service name
    pub namespace: String,

    /// How long a processing lock lives if the consumer dies mid-message
    pub lock_ttl: Duration,

    /// How long processed markers are kept
    pub processed_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            namespace: "kyc".to_string(),
            lock_ttl: Duration::from_secs(5 * 60),
            processed_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl IdempotencyConfig {
    /// Config for a namespace with default TTLs
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Lock key for a message
    pub fn lock_key(&self, message_id: Uuid) -> String {
        format!("{}:lock:{}", self.namespace, message_id)
    }

    /// Processed-marker key for a message
    pub fn processed_key(&self, message_id: Uuid) -> String {
        format!("{}:processed:{}", self.namespace, message_id)
    }
}

/// Result of offering a message to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Handler ran and succeeded
    Processed,
    /// Marker found; the message was handled before
    AlreadyProcessed,
    /// Another delivery holds the lock
    InFlight,
}

impl ConsumeOutcome {
    fn label(&self) -> &'static str {
        match self {
            ConsumeOutcome::Processed => "processed",
            ConsumeOutcome::AlreadyProcessed => "duplicate",
            ConsumeOutcome::InFlight => "in_flight",
        }
    }
}

/// Wraps a handler with lock-and-marker idempotency
pub struct IdempotentConsumer<H> {
    store: Arc<dyn IdempotencyStore>,
    handler: Arc<H>,
    config: IdempotencyConfig,
    instance_token: String,
}

impl<H: MessageHandler> IdempotentConsumer<H> {
    /// Create new consumer
    pub fn new(store: Arc<dyn IdempotencyStore>, handler: Arc<H>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            handler,
            config,
            instance_token: Uuid::new_v4().to_string(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Process a message at most once
    pub async fn consume(&self, envelope: &Envelope) -> Result<ConsumeOutcome> {
        let message_id = envelope.message_id;
        let processed_key = self.config.processed_key(message_id);

        if self.store.get(&processed_key).await?.is_some() {
            debug!("Message {} already processed, skipping", message_id);
            return Ok(self.record(envelope, ConsumeOutcome::AlreadyProcessed));
        }

        let lock_key = self.config.lock_key(message_id);
        if !self
            .store
            .try_acquire(&lock_key, &self.instance_token, self.config.lock_ttl)
            .await?
        {
            info!("Message {} is being processed elsewhere, skipping", message_id);
            return Ok(self.record(envelope, ConsumeOutcome::InFlight));
        }

        let start = Instant::now();
        let result = self.handler.handle(envelope).await;
        MESSAGE_PROCESS_DURATION
            .with_label_values(&[envelope.message_type.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(()) => self
                .store
                .put(&processed_key, "1", self.config.processed_ttl)
                .await
                .map(|_| ConsumeOutcome::Processed),
            Err(e) => {
                MESSAGE_HANDLER_FAILURES
                    .with_label_values(&[envelope.message_type.as_str()])
                    .inc();
                warn!("Handler failed for message {}: {}", message_id, e);
                Err(e)
            }
        };

        if let Err(e) = self.store.release(&lock_key, &self.instance_token).await {
            // the lock TTL bounds how long this blocks a retry
            warn!("Failed to release lock for message {}: {}", message_id, e);
        }

        outcome.map(|o| self.record(envelope, o))
    }

    fn record(&self, envelope: &Envelope, outcome: ConsumeOutcome) -> ConsumeOutcome {
        MESSAGE_CONSUME_TOTAL
            .with_label_values(&[envelope.message_type.as_str(), outcome.label()])
            .inc();
        outcome
    }
}

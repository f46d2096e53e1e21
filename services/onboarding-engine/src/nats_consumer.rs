// NATS consumer for screening results
// Listens to <prefix>.screening.completed and folds results into the case risk assessment

use crate::config::{IdempotencySettings, NatsConfig};
use crate::errors::OnboardingError;
use crate::models::{events, ScreeningCompleted};
use async_trait::async_trait;
use message_bus::{
    Envelope, IdempotencyConfig, IdempotencyStore, IdempotentConsumer, MessageHandler, Subscriber,
    SubscriberConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Consumer namespace for idempotency keys
pub const CONSUMER_NAMESPACE: &str = "onboarding-engine:screening";

/// Whatever applies screening results to cases
#[async_trait]
pub trait ScreeningSink: Send + Sync {
    async fn apply_screening(&self, result: ScreeningCompleted) -> crate::errors::Result<()>;
}

pub struct ScreeningHandler<S> {
    sink: Arc<S>,
}

impl<S: ScreeningSink> ScreeningHandler<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: ScreeningSink> MessageHandler for ScreeningHandler<S> {
    async fn handle(&self, envelope: &Envelope) -> message_bus::Result<()> {
        let result: ScreeningCompleted = match envelope.decode_payload() {
            Ok(result) => result,
            Err(e) => {
                // redelivery cannot fix a malformed payload
                warn!("Dropping malformed screening message {}: {}", envelope.message_id, e);
                return Ok(());
            }
        };

        info!(
            "Screening result for case {} from {} ({} checks)",
            result.case_id,
            result.provider,
            result.results.len()
        );

        match self.sink.apply_screening(result).await {
            Ok(()) => Ok(()),
            Err(e @ (OnboardingError::NotFound { .. } | OnboardingError::Validation(_))) => {
                warn!("Ignoring screening message {}: {}", envelope.message_id, e);
                Ok(())
            }
            Err(e) => Err(message_bus::Error::Handler(e.to_string())),
        }
    }
}

/// Idempotent consumer over the screening handler
pub fn screening_consumer<S: ScreeningSink>(
    store: Arc<dyn IdempotencyStore>,
    sink: Arc<S>,
    settings: &IdempotencySettings,
) -> IdempotentConsumer<ScreeningHandler<S>> {
    let config = IdempotencyConfig {
        lock_ttl: settings.lock_ttl(),
        processed_ttl: settings.processed_ttl(),
        ..IdempotencyConfig::for_namespace(CONSUMER_NAMESPACE)
    };
    IdempotentConsumer::new(store, Arc::new(ScreeningHandler::new(sink)), config)
}

pub fn start_screening_consumer<S: ScreeningSink + 'static>(
    client: async_nats::Client,
    nats: &NatsConfig,
    store: Arc<dyn IdempotencyStore>,
    sink: Arc<S>,
    settings: &IdempotencySettings,
) -> JoinHandle<()> {
    let subject = format!("{}.{}", nats.subject_prefix, events::SCREENING_COMPLETED);
    info!("Starting screening consumer on {}", subject);

    let consumer = Arc::new(screening_consumer(store, sink, settings));
    Subscriber::new(
        client,
        SubscriberConfig {
            stream_name: nats.stream_name.clone(),
            subject,
            durable_name: nats.durable_name.clone(),
            ack_wait: Duration::from_secs(nats.ack_wait_secs),
            max_deliver: nats.max_deliver,
            retry_delay: Duration::from_secs(nats.retry_delay_secs),
        },
        consumer,
    )
    .spawn()
}

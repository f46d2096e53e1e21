//! Durable JetStream subscriber feeding an idempotent consumer

use crate::{
    consumer::{ConsumeOutcome, IdempotentConsumer, MessageHandler},
    message::Envelope,
    metrics::MESSAGE_RECEIVE_TOTAL,
    Error, Result,
};
use async_nats::jetstream::{self, consumer, stream};
use async_nats::Client;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Stream capturing the subject
    pub stream_name: String,

    /// Full subject (wildcards allowed)
    pub subject: String,

    /// Durable consumer name, shared by all instances for load balancing
    pub durable_name: String,

    /// Acknowledgment wait time
    pub ack_wait: Duration,

    /// Max delivery attempts
    pub max_deliver: i64,

    /// Redelivery delay after a failed or in-flight message
    pub retry_delay: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            stream_name: "KYC".to_string(),
            subject: "kyc.>".to_string(),
            durable_name: "kyc-consumer".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// What to tell the server about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Done, never redeliver
    Ack,
    /// Redeliver after the delay
    Nak(Duration),
    /// Unparseable, never redeliver
    Term,
}

/// Message subscriber
pub struct Subscriber<H> {
    client: Client,
    config: SubscriberConfig,
    consumer: Arc<IdempotentConsumer<H>>,
}

impl<H: MessageHandler + 'static> Subscriber<H> {
    /// Create new subscriber
    pub fn new(client: Client, config: SubscriberConfig, consumer: Arc<IdempotentConsumer<H>>) -> Self {
        Self {
            client,
            config,
            consumer,
        }
    }

    /// Subscribe and process messages until the message stream ends
    pub async fn run(self) -> Result<()> {
        let js = jetstream::new(self.client.clone());
        let subject = self.config.subject.clone();

        let stream = js
            .get_or_create_stream(stream::Config {
                name: self.config.stream_name.clone(),
                subjects: vec![subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.durable_name,
                consumer::pull::Config {
                    durable_name: Some(self.config.durable_name.clone()),
                    filter_subject: subject.clone(),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    deliver_policy: consumer::DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        info!(
            "Subscribed to {} (stream: {}, consumer: {})",
            subject, self.config.stream_name, self.config.durable_name
        );

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        while let Some(msg) = messages.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Error receiving message on {}: {}", subject, e);
                    continue;
                }
            };

            let ack = process(&self.consumer, &subject, &msg.payload, self.config.retry_delay).await;
            let sent = match ack {
                Acknowledgement::Ack => msg.ack().await,
                Acknowledgement::Nak(delay) => msg.ack_with(jetstream::AckKind::Nak(Some(delay))).await,
                Acknowledgement::Term => msg.ack_with(jetstream::AckKind::Term).await,
            };
            if let Err(e) = sent {
                error!("Failed to send {:?} on {}: {}", ack, msg.subject, e);
            }
        }

        warn!("Subscription to {} ended", subject);
        Ok(())
    }

    /// Run on a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("Subscriber stopped: {}", e);
            }
        })
    }
}

/// Offer one delivery to the consumer and decide its acknowledgement
pub async fn process<H: MessageHandler>(
    consumer: &IdempotentConsumer<H>,
    subject: &str,
    payload: &[u8],
    retry_delay: Duration,
) -> Acknowledgement {
    let envelope = match Envelope::<serde_json::Value>::from_bytes(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Failed to parse message on {}: {}", subject, e);
            MESSAGE_RECEIVE_TOTAL
                .with_label_values(&[subject, "parse_error"])
                .inc();
            return Acknowledgement::Term;
        }
    };

    MESSAGE_RECEIVE_TOTAL
        .with_label_values(&[subject, "received"])
        .inc();

    match consumer.consume(&envelope).await {
        Ok(ConsumeOutcome::Processed | ConsumeOutcome::AlreadyProcessed) => Acknowledgement::Ack,
        // the holder may still fail, so come back later
        Ok(ConsumeOutcome::InFlight) => Acknowledgement::Nak(retry_delay),
        Err(e) => {
            error!("Failed to process message {}: {}", envelope.message_id, e);
            Acknowledgement::Nak(retry_delay)
        }
    }
}

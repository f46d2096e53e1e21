//! Message Bus with NATS support
//!
//! Provides pub/sub messaging with:
//! - JSON envelopes carrying a message id per event
//! - Durable JetStream consumers with explicit ack and redelivery
//! - Idempotent consumption backed by Redis set-if-not-exists locks
//! - Retry logic with exponential backoff on publish
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod consumer;
pub mod error;
pub mod idempotency;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod subscriber;

pub use consumer::{ConsumeOutcome, IdempotencyConfig, IdempotentConsumer, MessageHandler};
pub use error::{Error, Result};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore};
pub use message::Envelope;
pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{Acknowledgement, Subscriber, SubscriberConfig};

#[cfg(test)]
mod tests {
    #[test]
    fn test_package_metadata_inherited() {
        assert!(!env!("CARGO_PKG_REPOSITORY").is_empty());
        assert!(!env!("CARGO_PKG_LICENSE").is_empty());
    }
}

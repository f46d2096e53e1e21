//! # Webhooks
//!
//! Outbound partner notifications with:
//! - HMAC-SHA256 signed JSON bodies (`X-Webhook-Signature: sha256=<hex>`)
//! - A fixed retry schedule (immediate, 1m, 5m, 30m, 2h, 6h, 24h)
//! - No retries for 400, 401 and 403 responses
//! - Prometheus metrics per attempt
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │  Delivery    │───▶│  Dispatcher  │───▶│ WebhookTransport│──▶ partner
//! │ (state row)  │◀───│ sign+classify│◀───│  (reqwest)      │
//! └──────────────┘    └──────────────┘    └─────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod signing;
pub mod transport;
pub mod types;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use schedule::{classify, delay_before_attempt, StatusClass, MAX_ATTEMPTS, RETRY_SCHEDULE};
pub use transport::{HttpTransport, OutgoingRequest, WebhookTransport};
pub use types::*;

/// Default request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

//! HTTP seam for webhook delivery

use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// A signed webhook request ready to send
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// Target URL
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(&'static str, String)>,
    /// JSON body
    pub body: Vec<u8>,
}

/// Sends webhook requests and reports the response status
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST the request; `Err` means no HTTP response was received
    async fn send(&self, request: OutgoingRequest) -> Result<u16>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create transport with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kyc-webhooks/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<u16> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        match builder.body(request.body).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(Error::Timeout {
                seconds: self.timeout.as_secs(),
                operation: format!("POST {}", request.url),
            }),
            Err(e) if e.is_connect() => Err(Error::Connection(e.to_string())),
            Err(e) => Err(Error::Http(e)),
        }
    }
}

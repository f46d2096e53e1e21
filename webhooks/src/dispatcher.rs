//! Signed delivery attempts and the retry state machine

use crate::metrics::{WEBHOOK_ATTEMPTS_TOTAL, WEBHOOK_ATTEMPT_DURATION, WEBHOOK_DELIVERIES_FINISHED};
use crate::schedule::{classify, delay_before_attempt, StatusClass};
use crate::signing::{self, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::transport::{OutgoingRequest, WebhookTransport};
use crate::types::{AttemptOutcome, DeliveryStatus, WebhookDelivery, WebhookEndpoint};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs delivery attempts against a transport
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
}

impl Dispatcher {
    /// Create dispatcher
    pub fn new(transport: Arc<dyn WebhookTransport>) -> Self {
        Self { transport }
    }

    /// Make one signed attempt and record its outcome on `delivery`
    pub async fn attempt(
        &self,
        endpoint: &WebhookEndpoint,
        delivery: &mut WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        if !delivery.is_pending() {
            return Err(Error::NotPending(delivery.id));
        }

        let body = serde_json::to_vec(&delivery.payload)?;
        let signature = signing::sign(&endpoint.secret, &body)?;
        let request = OutgoingRequest {
            url: endpoint.url.clone(),
            headers: vec![
                (SIGNATURE_HEADER, signature),
                (EVENT_HEADER, delivery.event_type.clone()),
                (DELIVERY_HEADER, delivery.id.to_string()),
                (TIMESTAMP_HEADER, now.timestamp().to_string()),
            ],
            body,
        };

        let started = Instant::now();
        let outcome = match self.transport.send(request).await {
            Ok(status) => match classify(status) {
                StatusClass::Success => AttemptOutcome::Delivered(status),
                StatusClass::Permanent => AttemptOutcome::Rejected(status),
                StatusClass::Retryable => AttemptOutcome::Retryable {
                    status: Some(status),
                    error: format!("receiver answered HTTP {}", status),
                },
            },
            Err(e) => AttemptOutcome::Retryable {
                status: None,
                error: e.to_string(),
            },
        };

        WEBHOOK_ATTEMPT_DURATION
            .with_label_values(&[delivery.event_type.as_str()])
            .observe(started.elapsed().as_secs_f64());
        WEBHOOK_ATTEMPTS_TOTAL
            .with_label_values(&[delivery.event_type.as_str(), outcome.label()])
            .inc();

        record(delivery, &outcome, now);
        Ok(outcome)
    }

    /// Drive a delivery to a final status, sleeping through the schedule
    pub async fn deliver_with_retries(
        &self,
        endpoint: &WebhookEndpoint,
        delivery: &mut WebhookDelivery,
    ) -> Result<DeliveryStatus> {
        while delivery.is_pending() {
            let delay = delay_before_attempt(delivery.attempt_count).unwrap_or_default();
            if !delay.is_zero() {
                debug!(
                    "Delivery {} sleeping {:?} before attempt {}",
                    delivery.id,
                    delay,
                    delivery.attempt_count + 1
                );
                tokio::time::sleep(delay).await;
            }
            self.attempt(endpoint, delivery, Utc::now()).await?;
        }
        Ok(delivery.status)
    }
}

/// Apply an attempt outcome to the delivery state
pub fn record(delivery: &mut WebhookDelivery, outcome: &AttemptOutcome, now: DateTime<Utc>) {
    delivery.attempt_count += 1;

    match outcome {
        AttemptOutcome::Delivered(status) => {
            delivery.status = DeliveryStatus::Delivered;
            delivery.last_status_code = Some(*status);
            delivery.last_error = None;
            delivery.delivered_at = Some(now);
            delivery.next_attempt_at = None;
            info!(
                "Webhook {} delivered after {} attempt(s)",
                delivery.id, delivery.attempt_count
            );
        }
        AttemptOutcome::Rejected(status) => {
            delivery.status = DeliveryStatus::Failed;
            delivery.last_status_code = Some(*status);
            delivery.last_error = Some(format!("receiver rejected with HTTP {}", status));
            delivery.next_attempt_at = None;
            warn!("Webhook {} rejected with HTTP {}", delivery.id, status);
        }
        AttemptOutcome::Retryable { status, error } => {
            delivery.last_status_code = *status;
            delivery.last_error = Some(error.clone());

            match delay_before_attempt(delivery.attempt_count) {
                Some(delay) => {
                    // Schedule delays are small constants, conversion cannot overflow
                    let delay = chrono::Duration::from_std(delay).unwrap_or_default();
                    delivery.next_attempt_at = Some(now + delay);
                    warn!(
                        "Webhook {} attempt {} failed: {}",
                        delivery.id, delivery.attempt_count, error
                    );
                }
                None => {
                    delivery.status = DeliveryStatus::Failed;
                    delivery.next_attempt_at = None;
                    warn!(
                        "Webhook {} failed after {} attempts: {}",
                        delivery.id, delivery.attempt_count, error
                    );
                }
            }
        }
    }

    if !delivery.is_pending() {
        WEBHOOK_DELIVERIES_FINISHED
            .with_label_values(&[delivery.status.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{MAX_ATTEMPTS, RETRY_SCHEDULE};
    use crate::transport::HttpTransport;
    use crate::types::WebhookEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(url: String) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url,
            secret: "whsec_test".into(),
            event_types: vec![],
            active: true,
        }
    }

    fn delivery_for(endpoint: &WebhookEndpoint) -> WebhookDelivery {
        let event = WebhookEvent::new(
            "case.status_changed",
            endpoint.tenant_id,
            serde_json::json!({ "status": "approved" }),
        );
        WebhookDelivery::new(endpoint, &event)
    }

    fn http_dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap()))
    }

    /// Scripted transport answering from a queue and recording send times
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<u16>>>,
        sent_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<u16>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                sent_at: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn send(&self, _request: OutgoingRequest) -> Result<u16> {
            self.sent_at.lock().await.push(tokio::time::Instant::now());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(500))
        }
    }

    #[tokio::test]
    async fn test_signed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks"))
            .and(header("X-Webhook-Event", "case.status_changed"))
            .and(header("content-type", "application/json"))
            .and(header_exists("X-Webhook-Signature"))
            .and(header_exists("X-Webhook-Timestamp"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ep = endpoint(format!("{}/hooks", server.uri()));
        let mut delivery = delivery_for(&ep);
        let outcome = http_dispatcher()
            .attempt(&ep, &mut delivery, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome, AttemptOutcome::Delivered(200));
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert!(delivery.delivered_at.is_some());

        let received = server.received_requests().await.unwrap();
        let sig = received[0]
            .headers
            .get("X-Webhook-Signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(signing::verify("whsec_test", &received[0].body, sig));
        assert_eq!(
            received[0].headers.get("X-Webhook-Delivery").unwrap().to_str().unwrap(),
            delivery.id.to_string()
        );
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let ep = endpoint(server.uri());
        let mut delivery = delivery_for(&ep);
        let outcome = http_dispatcher()
            .attempt(&ep, &mut delivery, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome, AttemptOutcome::Rejected(401));
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempt_count, 1);
        assert!(delivery.next_attempt_at.is_none());

        let err = http_dispatcher()
            .attempt(&ep, &mut delivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPending(_)));
    }

    #[tokio::test]
    async fn test_server_error_schedules_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ep = endpoint(server.uri());
        let mut delivery = delivery_for(&ep);
        let now = Utc::now();
        let outcome = http_dispatcher().attempt(&ep, &mut delivery, now).await.unwrap();

        assert!(matches!(outcome, AttemptOutcome::Retryable { status: Some(503), .. }));
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.next_attempt_at, Some(now + chrono::Duration::seconds(60)));
        assert_eq!(delivery.last_status_code, Some(503));
    }

    #[tokio::test]
    async fn test_connection_error_is_retryable() {
        // Nothing listens on the discard port
        let ep = endpoint("http://127.0.0.1:9/hooks".into());
        let mut delivery = delivery_for(&ep);
        let outcome = http_dispatcher()
            .attempt(&ep, &mut delivery, Utc::now())
            .await
            .unwrap();

        assert!(matches!(outcome, AttemptOutcome::Retryable { status: None, .. }));
        assert!(delivery.is_pending());
        assert!(delivery.last_error.is_some());
    }

    #[test]
    fn test_schedule_exhaustion() {
        let ep = endpoint("http://unused".into());
        let mut delivery = delivery_for(&ep);
        let now = Utc::now();
        let outcome = AttemptOutcome::Retryable {
            status: Some(500),
            error: "boom".into(),
        };

        for n in 1..MAX_ATTEMPTS {
            record(&mut delivery, &outcome, now);
            assert!(delivery.is_pending());
            let expected = chrono::Duration::from_std(RETRY_SCHEDULE[n as usize]).unwrap();
            assert_eq!(delivery.next_attempt_at, Some(now + expected));
        }

        record(&mut delivery, &outcome, now);
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempt_count, MAX_ATTEMPTS);
        assert!(delivery.next_attempt_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_follow_schedule() {
        let transport = ScriptedTransport::new(vec![
            Ok(500),
            Err(Error::Connection("refused".into())),
            Ok(429),
            Ok(204),
        ]);
        let dispatcher = Dispatcher::new(transport.clone());
        let ep = endpoint("http://unused".into());
        let mut delivery = delivery_for(&ep);

        let status = dispatcher.deliver_with_retries(&ep, &mut delivery).await.unwrap();
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(delivery.attempt_count, 4);

        let sent = transport.sent_at.lock().await;
        assert_eq!(sent.len(), 4);
        for n in 1..4 {
            let gap = sent[n] - sent[n - 1];
            assert!(gap >= RETRY_SCHEDULE[n]);
            assert!(gap < RETRY_SCHEDULE[n] + Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = Dispatcher::new(transport.clone());
        let ep = endpoint("http://unused".into());
        let mut delivery = delivery_for(&ep);

        let status = dispatcher.deliver_with_retries(&ep, &mut delivery).await.unwrap();
        assert_eq!(status, DeliveryStatus::Failed);
        assert_eq!(transport.sent_at.lock().await.len(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_stops_retries() {
        let transport = ScriptedTransport::new(vec![Ok(502), Ok(403)]);
        let dispatcher = Dispatcher::new(transport.clone());
        let ep = endpoint("http://unused".into());
        let mut delivery = delivery_for(&ep);

        let status = dispatcher.deliver_with_retries(&ep, &mut delivery).await.unwrap();
        assert_eq!(status, DeliveryStatus::Failed);
        assert_eq!(delivery.last_status_code, Some(403));
        assert_eq!(transport.sent_at.lock().await.len(), 2);
    }
}

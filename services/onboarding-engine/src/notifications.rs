//! Webhook fan-out and the delivery worker
//!
//! Domain events become one pending delivery row per subscribed endpoint,
//! written in the same transaction as the change that caused them. The
//! worker leases due rows with `FOR UPDATE SKIP LOCKED` so several service
//! instances can poll the same table, sends them with no transaction open,
//! then records each outcome on its own.

use crate::database::Database;
use crate::errors::Result;
use crate::metrics::WEBHOOK_DELIVERIES_ENQUEUED;
use crate::models::{WebhookDeliveryRow, WebhookEndpointRow};
use chrono::Utc;
use futures_util::future::join_all;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use webhooks::{DeliveryStatus, Dispatcher, WebhookDelivery, WebhookEndpoint, WebhookEvent};

/// Deliveries for the endpoints subscribed to `event`
pub fn deliveries_for(endpoints: &[WebhookEndpoint], event: &WebhookEvent) -> Vec<WebhookDelivery> {
    endpoints
        .iter()
        .filter(|e| e.tenant_id == event.tenant_id && e.subscribes_to(&event.event_type))
        .map(|e| WebhookDelivery::new(e, event))
        .collect()
}

/// Queue `event` for every subscribed endpoint of its tenant
pub async fn enqueue(db: &Database, conn: &mut PgConnection, event: &WebhookEvent) -> Result<usize> {
    let endpoints: Vec<WebhookEndpoint> = db
        .active_endpoints_for_tenant(conn, event.tenant_id)
        .await?
        .into_iter()
        .map(WebhookEndpoint::from)
        .collect();

    let mut queued = 0;
    for delivery in deliveries_for(&endpoints, event) {
        if db.insert_delivery(conn, &delivery).await? {
            queued += 1;
        }
    }

    if queued > 0 {
        WEBHOOK_DELIVERIES_ENQUEUED
            .with_label_values(&[event.event_type.as_str()])
            .inc_by(queued as u64);
        debug!("Queued {} webhook deliveries for {}", queued, event.event_type);
    }
    Ok(queued)
}

pub struct WebhookWorker {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    batch_size: i64,
    poll_interval: Duration,
    lease: Duration,
}

impl WebhookWorker {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        batch_size: i64,
        poll_interval: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            db,
            dispatcher,
            batch_size,
            poll_interval,
            lease,
        }
    }

    /// One attempt for each due delivery in a batch; returns how many were tried
    pub async fn run_once(&self) -> Result<usize> {
        let claimed = self.db.claim_due_deliveries(self.batch_size, self.lease).await?;
        let count = claimed.len();

        let attempts = claimed
            .into_iter()
            .map(|(endpoint_row, delivery_row)| self.attempt(endpoint_row, delivery_row));
        for result in join_all(attempts).await {
            if let Err(e) = result {
                // the lease runs out and the row is claimed again
                error!("Failed to record webhook attempt: {}", e);
            }
        }

        Ok(count)
    }

    async fn attempt(&self, endpoint_row: WebhookEndpointRow, delivery_row: WebhookDeliveryRow) -> Result<()> {
        let mut delivery = WebhookDelivery::try_from(delivery_row)?;
        let endpoint = WebhookEndpoint::from(endpoint_row);

        if !endpoint.active {
            close_for_inactive_endpoint(&mut delivery);
        } else if let Err(e) = self.dispatcher.attempt(&endpoint, &mut delivery, Utc::now()).await {
            warn!("Webhook delivery {} could not be attempted: {}", delivery.id, e);
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        self.db.update_delivery(&mut tx, &delivery).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Poll until the task is dropped
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Webhook worker started (batch {}, every {:?})",
                self.batch_size, self.poll_interval
            );
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(0) => {}
                    Ok(n) => debug!("Webhook worker attempted {} deliveries", n),
                    Err(e) => error!("Webhook worker iteration failed: {}", e),
                }
            }
        })
    }
}

fn close_for_inactive_endpoint(delivery: &mut WebhookDelivery) {
    delivery.status = DeliveryStatus::Failed;
    delivery.next_attempt_at = None;
    delivery.last_error = Some("endpoint deactivated".to_string());
}

use super::Database;
use crate::errors::Result;
use crate::models::{RegisterEndpointRequest, WebhookDeliveryRow, WebhookEndpointRow};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgConnection;
use std::time::Duration;
use uuid::Uuid;
use webhooks::WebhookDelivery;

impl Database {
    pub async fn insert_endpoint(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
        request: &RegisterEndpointRequest,
    ) -> Result<WebhookEndpointRow> {
        let endpoint = sqlx::query_as::<_, WebhookEndpointRow>(
            r#"
            INSERT INTO webhook_endpoints (id, tenant_id, url, secret, event_types, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(&request.url)
        .bind(&request.secret)
        .bind(&request.event_types)
        .fetch_one(&mut *conn)
        .await?;

        Ok(endpoint)
    }

    pub async fn get_endpoint(&self, endpoint_id: Uuid) -> Result<Option<WebhookEndpointRow>> {
        let endpoint =
            sqlx::query_as::<_, WebhookEndpointRow>("SELECT * FROM webhook_endpoints WHERE id = $1")
                .bind(endpoint_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(endpoint)
    }

    pub async fn list_endpoints(&self, tenant_id: Uuid) -> Result<Vec<WebhookEndpointRow>> {
        let endpoints = sqlx::query_as::<_, WebhookEndpointRow>(
            "SELECT * FROM webhook_endpoints WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(endpoints)
    }

    pub async fn deactivate_endpoint(&self, conn: &mut PgConnection, endpoint_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE webhook_endpoints SET active = FALSE WHERE id = $1 AND active")
            .bind(endpoint_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn active_endpoints_for_tenant(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
    ) -> Result<Vec<WebhookEndpointRow>> {
        let endpoints = sqlx::query_as::<_, WebhookEndpointRow>(
            "SELECT * FROM webhook_endpoints WHERE tenant_id = $1 AND active",
        )
        .bind(tenant_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(endpoints)
    }

    /// Insert a pending delivery; returns false if the event was already
    /// queued for this endpoint
    pub async fn insert_delivery(&self, conn: &mut PgConnection, delivery: &WebhookDelivery) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (
                id, endpoint_id, event_id, event_type, payload, status,
                attempt_count, next_attempt_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (endpoint_id, event_id) DO NOTHING
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.endpoint_id)
        .bind(delivery.event_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.next_attempt_at)
        .bind(delivery.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Lease up to `limit` due pending deliveries by pushing their
    /// `next_attempt_at` past `lease`. Rows another worker is claiming are
    /// skipped; a lease that runs out makes the row due again.
    pub async fn claim_due_deliveries(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<(WebhookEndpointRow, WebhookDeliveryRow)>> {
        let lease = ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::minutes(1));
        let deliveries = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"
            UPDATE webhook_deliveries
            SET next_attempt_at = $2
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending' AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(Utc::now() + lease)
        .fetch_all(&self.pool)
        .await?;

        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint_ids: Vec<Uuid> = deliveries.iter().map(|d| d.endpoint_id).collect();
        let endpoints = sqlx::query_as::<_, WebhookEndpointRow>(
            "SELECT * FROM webhook_endpoints WHERE id = ANY($1)",
        )
        .bind(&endpoint_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries
            .into_iter()
            .filter_map(|d| {
                endpoints
                    .iter()
                    .find(|e| e.id == d.endpoint_id)
                    .map(|e| (e.clone(), d))
            })
            .collect())
    }

    pub async fn update_delivery(&self, conn: &mut PgConnection, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = $2,
                attempt_count = $3,
                next_attempt_at = $4,
                last_status_code = $5,
                last_error = $6,
                delivered_at = $7
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.next_attempt_at)
        .bind(delivery.last_status_code.map(i32::from))
        .bind(&delivery.last_error)
        .bind(delivery.delivered_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn list_deliveries(&self, endpoint_id: Uuid, limit: i64) -> Result<Vec<WebhookDeliveryRow>> {
        let deliveries = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE endpoint_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(endpoint_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }
}

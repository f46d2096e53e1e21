use super::Database;
use crate::errors::Result;
use crate::models::{
    OnboardingCase, Reviewer, UpsertReviewerRequest, WorkItem, WorkItemKind, WorkItemStatus,
    WorkPriority, WorkQueueQuery,
};
use chrono::Utc;
use risk_engine::RiskLevel;
use sqlx::PgConnection;
use uuid::Uuid;

const REVIEWERS_WITH_LOAD: &str = r#"
    SELECT r.id, r.display_name, r.email, r.active, r.senior, r.specialties, r.capacity,
           COALESCE(w.open_items, 0) AS open_items,
           r.last_assigned_at
    FROM reviewers r
    LEFT JOIN (
        SELECT assigned_to, COUNT(*) AS open_items
        FROM work_items
        WHERE status = 'assigned'
        GROUP BY assigned_to
    ) w ON w.assigned_to = r.id
"#;

impl Database {
    pub async fn insert_work_item(
        &self,
        conn: &mut PgConnection,
        case: &OnboardingCase,
        kind: WorkItemKind,
        risk_level: RiskLevel,
    ) -> Result<WorkItem> {
        let now = Utc::now();
        let priority = WorkPriority::from_risk(risk_level, kind);

        let item = sqlx::query_as::<_, WorkItem>(
            r#"
            INSERT INTO work_items (
                id, case_id, tenant_id, kind, priority, status, entity_type,
                risk_level, due_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(case.id)
        .bind(case.tenant_id)
        .bind(kind)
        .bind(priority)
        .bind(WorkItemStatus::Queued)
        .bind(case.entity_type)
        .bind(risk_level.as_str())
        .bind(priority.due_at(now))
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(item)
    }

    pub async fn get_work_item(&self, item_id: Uuid) -> Result<Option<WorkItem>> {
        let item = sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    pub async fn list_work_items(&self, query: &WorkQueueQuery) -> Result<Vec<WorkItem>> {
        let items = sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT * FROM work_items
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR assigned_to = $2)
            ORDER BY due_at, created_at
            LIMIT 500
            "#,
        )
        .bind(query.status)
        .bind(query.assigned_to)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn queued_work_items(&self) -> Result<Vec<WorkItem>> {
        let items = sqlx::query_as::<_, WorkItem>(
            "SELECT * FROM work_items WHERE status = 'queued' ORDER BY due_at, created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Assign a queued item; `None` when someone else got there first
    pub async fn assign_work_item(
        &self,
        conn: &mut PgConnection,
        item_id: Uuid,
        reviewer_id: Uuid,
    ) -> Result<Option<WorkItem>> {
        let item = sqlx::query_as::<_, WorkItem>(
            r#"
            UPDATE work_items
            SET status = 'assigned', assigned_to = $2, assigned_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(item_id)
        .bind(reviewer_id)
        .fetch_optional(&mut *conn)
        .await?;

        if item.is_some() {
            sqlx::query("UPDATE reviewers SET last_assigned_at = NOW() WHERE id = $1")
                .bind(reviewer_id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(item)
    }

    pub async fn complete_work_item(&self, conn: &mut PgConnection, item_id: Uuid) -> Result<Option<WorkItem>> {
        let item = sqlx::query_as::<_, WorkItem>(
            r#"
            UPDATE work_items
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'assigned')
            RETURNING *
            "#,
        )
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    /// Close every open item of a case with `status`
    pub async fn close_work_items_for_case(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        status: WorkItemStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = $2, completed_at = NOW()
            WHERE case_id = $1 AND status IN ('queued', 'assigned')
            "#,
        )
        .bind(case_id)
        .bind(status)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_reviewers(&self) -> Result<Vec<Reviewer>> {
        let reviewers = sqlx::query_as::<_, Reviewer>(&format!(
            "{} ORDER BY r.display_name, r.id",
            REVIEWERS_WITH_LOAD
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(reviewers)
    }

    pub async fn get_reviewer(&self, reviewer_id: Uuid) -> Result<Option<Reviewer>> {
        let reviewer = sqlx::query_as::<_, Reviewer>(&format!("{} WHERE r.id = $1", REVIEWERS_WITH_LOAD))
            .bind(reviewer_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reviewer)
    }

    pub async fn reviewer_in_tx(&self, conn: &mut PgConnection, reviewer_id: Uuid) -> Result<Option<Reviewer>> {
        let reviewer = sqlx::query_as::<_, Reviewer>(&format!("{} WHERE r.id = $1", REVIEWERS_WITH_LOAD))
            .bind(reviewer_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(reviewer)
    }

    /// Insert or replace the reviewer profile keyed by id
    pub async fn upsert_reviewer(
        &self,
        conn: &mut PgConnection,
        reviewer_id: Uuid,
        request: &UpsertReviewerRequest,
    ) -> Result<()> {
        let specialties: Vec<String> = request
            .specialties
            .iter()
            .map(|e| e.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO reviewers (id, display_name, email, active, senior, specialties, capacity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                email = EXCLUDED.email,
                active = EXCLUDED.active,
                senior = EXCLUDED.senior,
                specialties = EXCLUDED.specialties,
                capacity = EXCLUDED.capacity
            "#,
        )
        .bind(reviewer_id)
        .bind(&request.display_name)
        .bind(request.email.to_ascii_lowercase())
        .bind(request.active)
        .bind(request.senior)
        .bind(&specialties)
        .bind(request.capacity)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

use super::Database;
use crate::errors::Result;
use crate::models::{
    CaseStatus, ChecklistItem, ChecklistItemStatus, CreateCaseRequest, DocumentType,
    OnboardingCase, UpdateApplicantRequest,
};
use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

impl Database {
    pub async fn insert_case(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
        created_by: &str,
        request: &CreateCaseRequest,
    ) -> Result<OnboardingCase> {
        let case = sqlx::query_as::<_, OnboardingCase>(
            r#"
            INSERT INTO onboarding_cases (
                id, tenant_id, external_reference, entity_type, status,
                applicant_name, country, industry, applicant_details,
                created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(&request.external_reference)
        .bind(request.entity_type)
        .bind(CaseStatus::Draft)
        .bind(&request.applicant_name)
        .bind(request.country.to_ascii_uppercase())
        .bind(&request.industry)
        .bind(
            request
                .applicant_details
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
        )
        .bind(created_by)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;

        Ok(case)
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<Option<OnboardingCase>> {
        let case = sqlx::query_as::<_, OnboardingCase>("SELECT * FROM onboarding_cases WHERE id = $1")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(case)
    }

    /// Row-locked read inside a transaction
    pub async fn lock_case(&self, conn: &mut PgConnection, case_id: Uuid) -> Result<Option<OnboardingCase>> {
        let case = sqlx::query_as::<_, OnboardingCase>(
            "SELECT * FROM onboarding_cases WHERE id = $1 FOR UPDATE",
        )
        .bind(case_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(case)
    }

    pub async fn list_cases(
        &self,
        tenant_id: Option<Uuid>,
        status: Option<CaseStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OnboardingCase>> {
        let cases = sqlx::query_as::<_, OnboardingCase>(
            r#"
            SELECT * FROM onboarding_cases
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(cases)
    }

    pub async fn update_applicant(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        update: &UpdateApplicantRequest,
    ) -> Result<OnboardingCase> {
        let case = sqlx::query_as::<_, OnboardingCase>(
            r#"
            UPDATE onboarding_cases
            SET applicant_name = COALESCE($2, applicant_name),
                country = COALESCE($3, country),
                industry = COALESCE($4, industry),
                applicant_details = COALESCE($5, applicant_details),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(case_id)
        .bind(&update.applicant_name)
        .bind(update.country.as_ref().map(|c| c.to_ascii_uppercase()))
        .bind(&update.industry)
        .bind(&update.applicant_details)
        .fetch_one(&mut *conn)
        .await?;

        Ok(case)
    }

    /// Compare-and-set on status; `None` if the case moved meanwhile
    pub async fn update_case_status(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        from: CaseStatus,
        to: CaseStatus,
        decision_reason: Option<&str>,
    ) -> Result<Option<OnboardingCase>> {
        let case = sqlx::query_as::<_, OnboardingCase>(
            r#"
            UPDATE onboarding_cases
            SET status = $3,
                decision_reason = COALESCE($4, decision_reason),
                submitted_at = CASE WHEN $3 = 'submitted' THEN NOW() ELSE submitted_at END,
                decided_at = CASE WHEN $3 IN ('approved', 'rejected', 'cancelled') THEN NOW() ELSE decided_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(case_id)
        .bind(from)
        .bind(to)
        .bind(decision_reason)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(case)
    }

    pub async fn insert_checklist_items(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        document_types: &[DocumentType],
        enhanced: bool,
    ) -> Result<Vec<ChecklistItem>> {
        let mut items = Vec::with_capacity(document_types.len());
        for document_type in document_types {
            let item = sqlx::query_as::<_, ChecklistItem>(
                r#"
                INSERT INTO checklist_items (id, case_id, document_type, enhanced, status)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (case_id, document_type) DO UPDATE SET updated_at = checklist_items.updated_at
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(case_id)
            .bind(*document_type)
            .bind(enhanced)
            .bind(ChecklistItemStatus::Outstanding)
            .fetch_one(&mut *conn)
            .await?;
            items.push(item);
        }
        Ok(items)
    }

    pub async fn checklist_for_case(&self, case_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let items = sqlx::query_as::<_, ChecklistItem>(
            "SELECT * FROM checklist_items WHERE case_id = $1 ORDER BY enhanced, created_at",
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn checklist_in_tx(&self, conn: &mut PgConnection, case_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let items = sqlx::query_as::<_, ChecklistItem>(
            "SELECT * FROM checklist_items WHERE case_id = $1 ORDER BY enhanced, created_at",
        )
        .bind(case_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    pub async fn get_checklist_item(&self, item_id: Uuid) -> Result<Option<ChecklistItem>> {
        let item = sqlx::query_as::<_, ChecklistItem>("SELECT * FROM checklist_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Set status on the item for `document_type`; returns `None` when the
    /// checklist has no such item
    pub async fn set_checklist_status(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        document_type: DocumentType,
        status: ChecklistItemStatus,
        document_id: Option<Uuid>,
        note: Option<&str>,
    ) -> Result<Option<ChecklistItem>> {
        let item = sqlx::query_as::<_, ChecklistItem>(
            r#"
            UPDATE checklist_items
            SET status = $3,
                document_id = COALESCE($4, document_id),
                note = $5,
                updated_at = NOW()
            WHERE case_id = $1 AND document_type = $2
            RETURNING *
            "#,
        )
        .bind(case_id)
        .bind(document_type)
        .bind(status)
        .bind(document_id)
        .bind(note)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }
}

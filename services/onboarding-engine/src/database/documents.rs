use super::Database;
use crate::errors::Result;
use crate::models::{Document, DocumentStatus, RegisterDocumentRequest};
use sqlx::PgConnection;
use uuid::Uuid;

impl Database {
    pub async fn insert_document(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        tenant_id: Uuid,
        uploaded_by: &str,
        request: &RegisterDocumentRequest,
    ) -> Result<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (
                id, case_id, tenant_id, document_type, file_name, content_type,
                size_bytes, sha256, storage_key, status, uploaded_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(case_id)
        .bind(tenant_id)
        .bind(request.document_type)
        .bind(&request.file_name)
        .bind(&request.content_type)
        .bind(request.size_bytes)
        .bind(request.sha256.to_ascii_lowercase())
        .bind(&request.storage_key)
        .bind(DocumentStatus::Uploaded)
        .bind(uploaded_by)
        .fetch_one(&mut *conn)
        .await?;

        Ok(document)
    }

    pub async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document)
    }

    pub async fn documents_for_case(&self, case_id: Uuid) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE case_id = $1 ORDER BY uploaded_at",
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    /// Record a review decision on an uploaded document; `None` if already reviewed
    pub async fn review_document(
        &self,
        conn: &mut PgConnection,
        document_id: Uuid,
        status: DocumentStatus,
        reviewer: &str,
        rejection_reason: Option<&str>,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents
            SET status = $2,
                reviewed_by = $3,
                rejection_reason = $4,
                reviewed_at = NOW()
            WHERE id = $1 AND status = 'uploaded'
            RETURNING *
            "#,
        )
        .bind(document_id)
        .bind(status)
        .bind(reviewer)
        .bind(rejection_reason)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(document)
    }
}

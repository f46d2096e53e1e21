use super::Database;
use crate::errors::Result;
use risk_engine::RiskAssessment;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

impl Database {
    pub async fn insert_assessment(&self, conn: &mut PgConnection, assessment: &RiskAssessment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_assessments (
                id, case_id, assessment, overall_score, risk_level, effective_level, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(assessment.id)
        .bind(assessment.case_id)
        .bind(Json(assessment))
        .bind(assessment.overall_score)
        .bind(assessment.risk_level.as_str())
        .bind(assessment.effective_level().as_str())
        .bind(assessment.version)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_assessment(&self, case_id: Uuid) -> Result<Option<RiskAssessment>> {
        let row = sqlx::query_scalar::<_, Json<RiskAssessment>>(
            "SELECT assessment FROM risk_assessments WHERE case_id = $1",
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|Json(a)| a))
    }

    pub async fn assessment_in_tx(&self, conn: &mut PgConnection, case_id: Uuid) -> Result<Option<RiskAssessment>> {
        let row = sqlx::query_scalar::<_, Json<RiskAssessment>>(
            "SELECT assessment FROM risk_assessments WHERE case_id = $1",
        )
        .bind(case_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|Json(a)| a))
    }

    /// Optimistic write: succeeds only if the stored version is `expected_version`
    pub async fn save_assessment(
        &self,
        conn: &mut PgConnection,
        assessment: &RiskAssessment,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE risk_assessments
            SET assessment = $2,
                overall_score = $3,
                risk_level = $4,
                effective_level = $5,
                version = $6,
                updated_at = NOW()
            WHERE case_id = $1 AND version = $7
            "#,
        )
        .bind(assessment.case_id)
        .bind(Json(assessment))
        .bind(assessment.overall_score)
        .bind(assessment.risk_level.as_str())
        .bind(assessment.effective_level().as_str())
        .bind(assessment.version)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

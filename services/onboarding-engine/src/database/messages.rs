use super::Database;
use crate::errors::Result;
use crate::models::{CaseMessage, Portal};
use sqlx::PgConnection;
use uuid::Uuid;

impl Database {
    pub async fn insert_message(
        &self,
        conn: &mut PgConnection,
        case_id: Uuid,
        author: &str,
        portal: Portal,
        body: &str,
        internal: bool,
    ) -> Result<CaseMessage> {
        let message = sqlx::query_as::<_, CaseMessage>(
            r#"
            INSERT INTO case_messages (id, case_id, author, portal, body, internal)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(case_id)
        .bind(author)
        .bind(portal)
        .bind(body)
        .bind(internal)
        .fetch_one(&mut *conn)
        .await?;

        Ok(message)
    }

    pub async fn list_messages(&self, case_id: Uuid, include_internal: bool) -> Result<Vec<CaseMessage>> {
        let messages = sqlx::query_as::<_, CaseMessage>(
            r#"
            SELECT * FROM case_messages
            WHERE case_id = $1 AND ($2 OR NOT internal)
            ORDER BY created_at, id
            "#,
        )
        .bind(case_id)
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}

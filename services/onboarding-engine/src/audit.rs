//! Append-only audit log with a SHA-256 hash chain
//!
//! Each entry hashes its own content together with the previous entry's hash.
//! Appends are serialized through a transaction-scoped Postgres advisory lock
//! so the chain never forks.

use crate::errors::Result;
use crate::metrics::AUDIT_ENTRIES_TOTAL;
use crate::models::AuditEntry;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use uuid::Uuid;

/// Hash preceding the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Advisory lock key shared by all appenders
const AUDIT_LOCK_KEY: i64 = 0x4b59_435f_4155_4454;

/// Entry content before it is chained
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub tenant_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            case_id: None,
            actor: actor.into(),
            action: action.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn case(mut self, tenant_id: Uuid, case_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self.case_id = Some(case_id);
        self
    }

    pub fn tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Hash of one entry given its predecessor's hash
#[allow(clippy::too_many_arguments)]
pub fn compute_hash(
    previous_hash: &str,
    id: Uuid,
    tenant_id: Option<Uuid>,
    case_id: Option<Uuid>,
    actor: &str,
    action: &str,
    details: &serde_json::Value,
    created_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        previous_hash.to_string(),
        id.to_string(),
        tenant_id.map(|t| t.to_string()).unwrap_or_default(),
        case_id.map(|c| c.to_string()).unwrap_or_default(),
        actor.to_string(),
        action.to_string(),
        details.to_string(),
        created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

fn entry_hash(entry: &AuditEntry) -> String {
    compute_hash(
        &entry.previous_hash,
        entry.id,
        entry.tenant_id,
        entry.case_id,
        &entry.actor,
        &entry.action,
        &entry.details,
        entry.created_at,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entries_checked: usize,
    /// First sequence number whose link or hash does not match
    pub first_invalid_seq: Option<i64>,
}

/// Verify a chain slice in sequence order starting from `expected_previous`
pub fn verify_chain(entries: &[AuditEntry], expected_previous: &str) -> ChainVerification {
    let mut previous = expected_previous.to_string();

    for (checked, entry) in entries.iter().enumerate() {
        if entry.previous_hash != previous || entry_hash(entry) != entry.hash {
            return ChainVerification {
                valid: false,
                entries_checked: checked + 1,
                first_invalid_seq: Some(entry.seq),
            };
        }
        previous = entry.hash.clone();
    }

    ChainVerification {
        valid: true,
        entries_checked: entries.len(),
        first_invalid_seq: None,
    }
}

/// Append an entry inside the caller's transaction
pub async fn append(conn: &mut PgConnection, new: NewAuditEntry) -> Result<AuditEntry> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let previous_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
    let previous_hash = previous_hash.unwrap_or_else(|| GENESIS_HASH.to_string());

    let id = Uuid::now_v7();
    // Postgres keeps microseconds; hash what will be read back
    let created_at = Utc::now().trunc_subsecs(6);
    let hash = compute_hash(
        &previous_hash,
        id,
        new.tenant_id,
        new.case_id,
        &new.actor,
        &new.action,
        &new.details,
        created_at,
    );

    let entry = sqlx::query_as::<_, AuditEntry>(
        r#"
        INSERT INTO audit_log (
            id, tenant_id, case_id, actor, action, details,
            created_at, previous_hash, hash
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(new.tenant_id)
    .bind(new.case_id)
    .bind(&new.actor)
    .bind(&new.action)
    .bind(&new.details)
    .bind(created_at)
    .bind(&previous_hash)
    .bind(&hash)
    .fetch_one(&mut *conn)
    .await?;

    AUDIT_ENTRIES_TOTAL.with_label_values(&[entry.action.as_str()]).inc();
    Ok(entry)
}

pub async fn entries_for_case(conn: &mut PgConnection, case_id: Uuid) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log WHERE case_id = $1 ORDER BY seq",
    )
    .bind(case_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

/// Walk the full chain in pages
pub async fn verify_all(conn: &mut PgConnection, page_size: i64) -> Result<ChainVerification> {
    let mut previous = GENESIS_HASH.to_string();
    let mut last_seq = 0_i64;
    let mut checked = 0_usize;

    loop {
        let page = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_log WHERE seq > $1 ORDER BY seq LIMIT $2",
        )
        .bind(last_seq)
        .bind(page_size)
        .fetch_all(&mut *conn)
        .await?;

        let Some(last) = page.last() else {
            break;
        };
        last_seq = last.seq;

        let result = verify_chain(&page, &previous);
        checked += result.entries_checked;
        if !result.valid {
            return Ok(ChainVerification {
                entries_checked: checked,
                ..result
            });
        }
        previous = last.hash.clone();
    }

    Ok(ChainVerification {
        valid: true,
        entries_checked: checked,
        first_invalid_seq: None,
    })
}

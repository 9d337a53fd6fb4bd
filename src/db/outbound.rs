//! Outbound-candidate persistence: the record an AI-generated (or
//! operator-submitted) reply occupies between C10's extraction and C11's
//! send decision (spec §3, §4.10, §4.11).

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::tenant::TenantScope;
use crate::error::AppError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutboundCandidate {
    pub id: String,
    pub conversation_id: String,
    pub tenant_id: String,
    pub content: String,
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub status: String,
    pub idempotency_key: String,
    pub created_at: String,
}

#[allow(clippy::too_many_arguments)]
pub fn insert(
    scope: &TenantScope,
    conversation_id: &str,
    content: &str,
    intent: Option<&str>,
    confidence: Option<f64>,
) -> Result<OutboundCandidate, AppError> {
    let id = Uuid::new_v4().to_string();
    let idempotency_key = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    scope.conn().execute(
        "INSERT INTO outbound_candidates (id, conversation_id, tenant_id, content, intent, confidence, status, idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending_delivery', ?7, ?8)",
        params![id, conversation_id, scope.tenant_id(), content, intent, confidence, idempotency_key, now],
    )?;

    Ok(OutboundCandidate {
        id,
        conversation_id: conversation_id.to_string(),
        tenant_id: scope.tenant_id().to_string(),
        content: content.to_string(),
        intent: intent.map(String::from),
        confidence,
        status: "pending_delivery".into(),
        idempotency_key,
        created_at: now,
    })
}

pub fn find(scope: &TenantScope, candidate_id: &str) -> Result<OutboundCandidate, AppError> {
    scope.conn().query_row(
        "SELECT id, conversation_id, tenant_id, content, intent, confidence, status, idempotency_key, created_at
         FROM outbound_candidates WHERE id = ?1 AND tenant_id = ?2",
        params![candidate_id, scope.tenant_id()],
        map_candidate,
    ).map_err(Into::into)
}

pub fn set_status(scope: &TenantScope, candidate_id: &str, status: &str) -> Result<(), AppError> {
    scope.conn().execute(
        "UPDATE outbound_candidates SET status = ?1 WHERE id = ?2 AND tenant_id = ?3",
        params![status, candidate_id, scope.tenant_id()],
    )?;
    Ok(())
}

/// Replace `content` with a template-rendered payload while keeping the
/// same row/idempotency key (spec §4.11 template fallback).
pub fn replace_content(scope: &TenantScope, candidate_id: &str, content: &str) -> Result<(), AppError> {
    scope.conn().execute(
        "UPDATE outbound_candidates SET content = ?1 WHERE id = ?2 AND tenant_id = ?3",
        params![content, candidate_id, scope.tenant_id()],
    )?;
    Ok(())
}

fn map_candidate(r: &rusqlite::Row) -> rusqlite::Result<OutboundCandidate> {
    Ok(OutboundCandidate {
        id: r.get(0)?,
        conversation_id: r.get(1)?,
        tenant_id: r.get(2)?,
        content: r.get(3)?,
        intent: r.get(4)?,
        confidence: r.get(5)?,
        status: r.get(6)?,
        idempotency_key: r.get(7)?,
        created_at: r.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    fn seed_tenant(db: &crate::db::pool::Db, tenant_id: &str) {
        db.conn()
            .execute(
                "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
                params![tenant_id],
            )
            .unwrap();
    }

    #[test]
    fn insert_then_find_round_trips() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let candidate = insert(&scope, "conv-1", "hello there", Some("greeting"), Some(0.9)).unwrap();
        let found = find(&scope, &candidate.id).unwrap();
        assert_eq!(found.content, "hello there");
        assert_eq!(found.status, "pending_delivery");
    }

    #[test]
    fn set_status_persists() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let candidate = insert(&scope, "conv-1", "hello", None, None).unwrap();
        set_status(&scope, &candidate.id, "sent").unwrap();
        assert_eq!(find(&scope, &candidate.id).unwrap().status, "sent");
    }
}

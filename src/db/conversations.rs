//! C8 — Conversation Store. Tenant-scoped conversation + message
//! persistence. Grounded on teacher's `db.rs` schema/migration idiom,
//! generalized from Room/Message to Conversation/Message (spec §3, §4.8).

use chrono::Utc;
use rusqlite::params;

use super::models::{Conversation, Message};
use super::tenant::TenantScope;
use crate::error::AppError;

/// Atomic find-or-create on the unique (tenant, platform, customer) index
/// among non-resolved conversations (spec §4.8, §8 invariant).
pub fn find_or_create_conversation(
    scope: &TenantScope,
    platform: &str,
    customer_id: &str,
) -> Result<Conversation, AppError> {
    let conn = scope.conn();
    let platform = platform.to_lowercase();

    if let Some(existing) = find_open(scope, &platform, customer_id)? {
        return Ok(existing);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO conversations (id, tenant_id, customer_id, platform, stage)
         VALUES (?1, ?2, ?3, ?4, 'greeting')",
        params![id, scope.tenant_id(), customer_id, platform],
    );

    match insert {
        Ok(_) => Ok(Conversation {
            id,
            tenant_id: scope.tenant_id().to_string(),
            customer_id: customer_id.to_string(),
            platform,
            stage: "greeting".into(),
            last_customer_message_at: None,
            last_outbound_at: None,
        }),
        // Unique-constraint races are swallowed and retried as reads
        // (spec §4.8 failure model: idempotent creation).
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            find_open(scope, &platform, customer_id)?
                .ok_or_else(|| AppError::Internal("TENANT_MISCONFIGURED".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get(scope: &TenantScope, conversation_id: &str) -> Result<Conversation, AppError> {
    scope
        .conn()
        .query_row(
            "SELECT id, tenant_id, customer_id, platform, stage, last_customer_message_at, last_outbound_at
             FROM conversations WHERE id = ?1 AND tenant_id = ?2",
            params![conversation_id, scope.tenant_id()],
            |r| {
                Ok(Conversation {
                    id: r.get(0)?,
                    tenant_id: r.get(1)?,
                    customer_id: r.get(2)?,
                    platform: r.get(3)?,
                    stage: r.get(4)?,
                    last_customer_message_at: r.get(5)?,
                    last_outbound_at: r.get(6)?,
                })
            },
        )
        .map_err(Into::into)
}

fn find_open(
    scope: &TenantScope,
    platform: &str,
    customer_id: &str,
) -> Result<Option<Conversation>, AppError> {
    let conn = scope.conn();
    let row = conn.query_row(
        "SELECT id, tenant_id, customer_id, platform, stage, last_customer_message_at, last_outbound_at
         FROM conversations
         WHERE tenant_id = ?1 AND platform = ?2 AND customer_id = ?3 AND stage != 'resolved'",
        params![scope.tenant_id(), platform, customer_id],
        |r| {
            Ok(Conversation {
                id: r.get(0)?,
                tenant_id: r.get(1)?,
                customer_id: r.get(2)?,
                platform: r.get(3)?,
                stage: r.get(4)?,
                last_customer_message_at: r.get(5)?,
                last_outbound_at: r.get(6)?,
            })
        },
    );
    match row {
        Ok(c) => Ok(Some(c)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Idempotent on `platform_message_id` (spec §8 invariant: persisting twice
/// yields a single row). Also updates the conversation's window-tracking
/// timestamp in the same logical operation for inbound messages (C9).
pub fn append_message(
    scope: &TenantScope,
    conversation: &Conversation,
    direction: &str,
    platform_message_id: Option<&str>,
    content: &str,
    message_type: &str,
) -> Result<Message, AppError> {
    let conn = scope.conn();
    let now = Utc::now().to_rfc3339();

    if let Some(pmid) = platform_message_id {
        if let Some(existing) = find_by_platform_message_id(scope, &conversation.platform, pmid)? {
            return Ok(existing);
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO messages (id, conversation_id, tenant_id, platform, direction, platform_message_id, content, type, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'received', ?9)",
        params![
            id,
            conversation.id,
            scope.tenant_id(),
            conversation.platform,
            direction,
            platform_message_id,
            content,
            message_type,
            now
        ],
    );

    match insert {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            if let Some(pmid) = platform_message_id {
                if let Some(existing) = find_by_platform_message_id(scope, &conversation.platform, pmid)? {
                    return Ok(existing);
                }
            }
            return Err(AppError::Internal("TENANT_MISCONFIGURED".into()));
        }
        Err(e) => return Err(e.into()),
    }

    if direction == "inbound" {
        conn.execute(
            "UPDATE conversations SET last_customer_message_at = ?1 WHERE id = ?2",
            params![now, conversation.id],
        )?;
        conn.execute(
            "INSERT INTO window_state (tenant_id, customer_id, last_inbound_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, customer_id) DO UPDATE SET last_inbound_at = excluded.last_inbound_at",
            params![scope.tenant_id(), conversation.customer_id, now],
        )?;
    } else {
        conn.execute(
            "UPDATE conversations SET last_outbound_at = ?1 WHERE id = ?2",
            params![now, conversation.id],
        )?;
    }

    Ok(Message {
        id,
        conversation_id: conversation.id.clone(),
        direction: direction.to_string(),
        platform_message_id: platform_message_id.map(String::from),
        content: content.to_string(),
        message_type: message_type.to_string(),
        ai_confidence: None,
        ai_intent: None,
        processing_time_ms: None,
        status: "received".into(),
        created_at: now,
    })
}

/// Scoped by platform (spec §3: `platform_message_id` is unique within a
/// platform, not globally) so a coincidental id collision between two
/// different platforms can't dedupe an unrelated message.
fn find_by_platform_message_id(
    scope: &TenantScope,
    platform: &str,
    pmid: &str,
) -> Result<Option<Message>, AppError> {
    let conn = scope.conn();
    let row = conn.query_row(
        "SELECT id, conversation_id, direction, platform_message_id, content, type, ai_confidence, ai_intent, processing_time_ms, status, created_at
         FROM messages WHERE platform = ?1 AND platform_message_id = ?2",
        params![platform, pmid],
        map_message,
    );
    match row {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn map_message(r: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: r.get(0)?,
        conversation_id: r.get(1)?,
        direction: r.get(2)?,
        platform_message_id: r.get(3)?,
        content: r.get(4)?,
        message_type: r.get(5)?,
        ai_confidence: r.get(6)?,
        ai_intent: r.get(7)?,
        processing_time_ms: r.get(8)?,
        status: r.get(9)?,
        created_at: r.get(10)?,
    })
}

/// Ordered by created_at ascending, limit 20 by default (spec §4.8, §4.10).
pub fn recent_messages(
    scope: &TenantScope,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<Message>, AppError> {
    let conn = scope.conn();
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, direction, platform_message_id, content, type, ai_confidence, ai_intent, processing_time_ms, status, created_at
         FROM (
            SELECT * FROM messages WHERE conversation_id = ?1 AND tenant_id = ?2
            ORDER BY created_at DESC LIMIT ?3
         ) ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id, scope.tenant_id(), limit], map_message)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Monotonic within a short window; downgrades only permitted via the
/// `support` path (spec §4.8).
pub fn update_stage(scope: &TenantScope, conversation_id: &str, new_stage: &str) -> Result<(), AppError> {
    let conn = scope.conn();
    let current: String = conn.query_row(
        "SELECT stage FROM conversations WHERE id = ?1 AND tenant_id = ?2",
        params![conversation_id, scope.tenant_id()],
        |r| r.get(0),
    )?;

    let rank = |s: &str| match s {
        "greeting" => 0,
        "discovery" => 1,
        "negotiation" => 2,
        "closing" => 3,
        "support" => 4,
        "resolved" => 5,
        _ => 0,
    };

    if rank(new_stage) < rank(&current) && new_stage != "support" {
        return Err(AppError::Validation("stage downgrade requires support path".into()));
    }

    conn.execute(
        "UPDATE conversations SET stage = ?1 WHERE id = ?2 AND tenant_id = ?3",
        params![new_stage, conversation_id, scope.tenant_id()],
    )?;
    Ok(())
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
    fn find_or_create_is_idempotent() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let a = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        let b = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn append_message_dedupes_by_platform_message_id() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let convo = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        let m1 = append_message(&scope, &convo, "inbound", Some("mid.1"), "hello", "text").unwrap();
        let m2 = append_message(&scope, &convo, "inbound", Some("mid.1"), "hello", "text").unwrap();
        assert_eq!(m1.id, m2.id);

        let count: i64 = scope
            .conn()
            .query_row("SELECT COUNT(*) FROM messages WHERE platform_message_id = 'mid.1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn platform_message_id_collision_across_platforms_does_not_dedupe() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let ig = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        let mc = find_or_create_conversation(&scope, "manychat", "U1").unwrap();
        let a = append_message(&scope, &ig, "inbound", Some("shared-mid"), "hello", "text").unwrap();
        let b = append_message(&scope, &mc, "inbound", Some("shared-mid"), "hi there", "text").unwrap();
        assert_ne!(a.id, b.id);

        let count: i64 = scope
            .conn()
            .query_row("SELECT COUNT(*) FROM messages WHERE platform_message_id = 'shared-mid'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn inbound_message_updates_window_state() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let convo = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        append_message(&scope, &convo, "inbound", Some("mid.1"), "hello", "text").unwrap();

        let last_inbound: String = scope
            .conn()
            .query_row(
                "SELECT last_inbound_at FROM window_state WHERE tenant_id = 't1' AND customer_id = 'U1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(!last_inbound.is_empty());
    }

    #[test]
    fn stage_downgrade_rejected_outside_support() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let scope = TenantScope::new(db.conn(), "t1");
        let convo = find_or_create_conversation(&scope, "instagram", "U1").unwrap();
        update_stage(&scope, &convo.id, "negotiation").unwrap();
        assert!(update_stage(&scope, &convo.id, "greeting").is_err());
        assert!(update_stage(&scope, &convo.id, "support").is_ok());
    }
}

//! C15 — Telemetry & Audit trail. Every mutating admin/tenant action writes
//! one hash-chained row: `chain_digest = sha256(prev_chain_digest ||
//! action || target || before_digest || after_digest)`, so any row's digest
//! can be recomputed and compared to detect retroactive tampering.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::pool::Db;
use crate::crypto::aead::digest;
use crate::error::AppError;

pub struct AuditWriter;

impl AuditWriter {
    /// Append one entry to the chain, returning its id.
    pub fn record(
        db: &Db,
        actor_id: &str,
        tenant_id: Option<&str>,
        action: &str,
        target: &str,
        before: Option<&[u8]>,
        after: Option<&[u8]>,
    ) -> Result<String, AppError> {
        let conn = db.conn();
        let prev_chain_digest: String = conn
            .query_row(
                "SELECT chain_digest FROM audit_log ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap_or_else(|_| "genesis".to_string());

        let before_digest = before.map(digest);
        let after_digest = after.map(digest);
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut chain_input = prev_chain_digest;
        chain_input.push_str(action);
        chain_input.push_str(target);
        chain_input.push_str(before_digest.as_deref().unwrap_or(""));
        chain_input.push_str(after_digest.as_deref().unwrap_or(""));
        let chain_digest = digest(chain_input.as_bytes());

        conn.execute(
            "INSERT INTO audit_log (id, actor_id, tenant_id, action, target, before_digest, after_digest, chain_digest, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, actor_id, tenant_id, action, target, before_digest, after_digest, chain_digest, now],
        )?;

        Ok(id)
    }

    /// Recompute the chain from genesis and compare against stored
    /// `chain_digest` values; returns the id of the first row that fails to
    /// verify, if any.
    pub fn verify_chain(db: &Db) -> Result<Option<String>, AppError> {
        let conn = db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, target, before_digest, after_digest, chain_digest
             FROM audit_log ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows: Vec<(String, String, String, Option<String>, Option<String>, String)> = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut prev = "genesis".to_string();
        for (id, action, target, before_digest, after_digest, stored_chain_digest) in rows {
            let mut chain_input = prev.clone();
            chain_input.push_str(&action);
            chain_input.push_str(&target);
            chain_input.push_str(before_digest.as_deref().unwrap_or(""));
            chain_input.push_str(after_digest.as_deref().unwrap_or(""));
            let expected = digest(chain_input.as_bytes());
            if expected != stored_chain_digest {
                return Ok(Some(id));
            }
            prev = stored_chain_digest;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    #[test]
    fn chain_verifies_after_several_entries() {
        let db = test_db();
        AuditWriter::record(&db, "admin", Some("t1"), "credential.rotate", "cred-1", Some(b"old"), Some(b"new")).unwrap();
        AuditWriter::record(&db, "admin", Some("t1"), "conversation.stage_change", "conv-1", Some(b"greeting"), Some(b"support")).unwrap();
        assert!(AuditWriter::verify_chain(&db).unwrap().is_none());
    }

    #[test]
    fn tampering_with_a_row_breaks_the_chain() {
        let db = test_db();
        let id = AuditWriter::record(&db, "admin", Some("t1"), "credential.rotate", "cred-1", Some(b"old"), Some(b"new")).unwrap();
        AuditWriter::record(&db, "admin", Some("t1"), "conversation.stage_change", "conv-1", Some(b"greeting"), Some(b"support")).unwrap();

        db.conn()
            .execute("UPDATE audit_log SET action = 'credential.delete' WHERE id = ?1", params![id])
            .unwrap();

        assert!(AuditWriter::verify_chain(&db).unwrap().is_some());
    }
}

//! C14 — Dead-Letter & Replay. Terminal jobs land here with full payload and
//! last error; operators can inspect, redrive, or redact+discard.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::models::{DeadLetter, Priority};
use super::pool::Db;
use crate::error::AppError;

pub fn insert(
    db: &Db,
    job_id: &str,
    tenant_id: &str,
    job_type: &str,
    payload: &serde_json::Value,
    last_error: &str,
) -> Result<(), AppError> {
    db.conn().execute(
        "INSERT INTO dead_letters (id, job_id, tenant_id, job_type, payload, last_error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            job_id,
            tenant_id,
            job_type,
            payload.to_string(),
            last_error,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn inspect(db: &Db, dead_letter_id: &str) -> Result<DeadLetter, AppError> {
    let conn = db.conn();
    conn.query_row(
        "SELECT id, job_id, tenant_id, job_type, payload, last_error, created_at FROM dead_letters WHERE id = ?1",
        params![dead_letter_id],
        |r| {
            let payload_str: String = r.get(4)?;
            Ok(DeadLetter {
                id: r.get(0)?,
                job_id: r.get(1)?,
                tenant_id: r.get(2)?,
                job_type: r.get(3)?,
                payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
                last_error: r.get(5)?,
                created_at: r.get(6)?,
            })
        },
    )
    .map_err(Into::into)
}

pub fn list_for_tenant(db: &Db, tenant_id: &str) -> Result<Vec<DeadLetter>, AppError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, job_id, tenant_id, job_type, payload, last_error, created_at
         FROM dead_letters WHERE tenant_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map(params![tenant_id], |r| {
            let payload_str: String = r.get(4)?;
            Ok(DeadLetter {
                id: r.get(0)?,
                job_id: r.get(1)?,
                tenant_id: r.get(2)?,
                job_type: r.get(3)?,
                payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
                last_error: r.get(5)?,
                created_at: r.get(6)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Resets `attempt_count`, preserves original `tenant_id`, mints a fresh
/// idempotency key if side effects were not observed (spec §4.14). Returns
/// the new job id.
pub fn redrive(db: &Db, dead_letter_id: &str, override_priority: Option<Priority>) -> Result<String, AppError> {
    let dl = inspect(db, dead_letter_id)?;
    let new_job_id = Uuid::new_v4().to_string();
    let priority = override_priority.unwrap_or(Priority::Normal);
    let now = Utc::now().to_rfc3339();

    db.conn().execute(
        "INSERT INTO jobs (id, tenant_id, job_type, payload, priority, priority_rank, attempt_count, next_attempt_at, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 'pending', ?7)",
        params![
            new_job_id,
            dl.tenant_id,
            dl.job_type,
            dl.payload.to_string(),
            priority.as_str(),
            priority.rank(),
            now,
        ],
    )?;

    db.conn()
        .execute("DELETE FROM dead_letters WHERE id = ?1", params![dead_letter_id])?;

    Ok(new_job_id)
}

pub fn redact_and_discard(db: &Db, dead_letter_id: &str) -> Result<(), AppError> {
    db.conn().execute(
        "UPDATE dead_letters SET payload = '{}', last_error = '[redacted]' WHERE id = ?1",
        params![dead_letter_id],
    )?;
    db.conn()
        .execute("DELETE FROM dead_letters WHERE id = ?1", params![dead_letter_id])?;
    Ok(())
}

//! `WebhookEvent` persistence (spec §3): short-retention record of ingested
//! events for replay/dedupe inspection, independent of C2's KV-backed
//! `claim` fast path (this table is the durable record; C2 is the hot-path
//! dedupe check).

use chrono::Utc;
use rusqlite::params;

use super::pool::Db;
use crate::error::AppError;

pub fn record(
    db: &Db,
    event_id: &str,
    platform: &str,
    status: &str,
    raw_body_digest: &str,
) -> Result<(), AppError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO webhook_events (event_id, platform, received_at, status, raw_body_digest)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(event_id) DO UPDATE SET status = excluded.status",
        params![event_id, platform.to_lowercase(), Utc::now().to_rfc3339(), status, raw_body_digest],
    )?;
    Ok(())
}

pub fn mark_status(db: &Db, event_id: &str, status: &str) -> Result<(), AppError> {
    db.conn()
        .execute(
            "UPDATE webhook_events SET status = ?1 WHERE event_id = ?2",
            params![status, event_id],
        )?;
    Ok(())
}

/// TTL sweep: drop event records older than 72h (spec §3 retention).
pub fn sweep_expired(db: &Db) -> Result<usize, AppError> {
    let cutoff = (Utc::now() - chrono::Duration::hours(72)).to_rfc3339();
    let n = db
        .conn()
        .execute("DELETE FROM webhook_events WHERE received_at < ?1", params![cutoff])?;
    Ok(n)
}

//! `DeliveryLog` persistence: one row per send attempt (spec §3).

use chrono::Utc;
use rusqlite::params;

use super::tenant::TenantScope;
use crate::error::AppError;

#[allow(clippy::too_many_arguments)]
pub fn record(
    scope: &TenantScope,
    job_id: &str,
    conversation_id: &str,
    channel: &str,
    outcome: &str,
    upstream_message_id: Option<&str>,
    attempt_number: u32,
    latency_ms: i64,
    error_class: Option<&str>,
) -> Result<(), AppError> {
    scope.conn().execute(
        "INSERT INTO delivery_logs (id, job_id, conversation_id, channel, outcome, upstream_message_id, attempt_number, latency_ms, error_class, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            uuid::Uuid::new_v4().to_string(),
            job_id,
            conversation_id,
            channel,
            outcome,
            upstream_message_id,
            attempt_number,
            latency_ms,
            error_class,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

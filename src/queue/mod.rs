//! C5 — Job Queue. Durable priority queue over the `jobs` table: visibility
//! timeout, exponential backoff with jitter, dead-lettering, and a
//! per-tenant concurrency cap (spec §4.5). Grounded on the teacher's
//! `retention.rs` background-loop shape (a `tokio::spawn`'d periodic sweep
//! over a `Connection`), generalized from a single fixed sweep to a
//! dequeue-claim-complete/fail cycle plus a separate visibility-timeout
//! reaper sweep.

pub mod worker;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rusqlite::params;

use crate::db::models::{Job, JobType, Priority};
use crate::db::pool::Db;
use crate::db::{dead_letters, tenant::TenantScope};
use crate::error::AppError;

const BASE_BACKOFF_SECS: f64 = 1.0;
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Absolute deadline `seconds` from now, for an `enqueue` call. Every job
/// type needs its own budget (spec §5: every suspension point honors the
/// job's soft deadline, and every external HTTP call derives its timeout
/// from it) — callers pick the constant that fits the work the job does.
pub fn deadline_after(seconds: i64) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(seconds)
}

pub struct JobQueue {
    db: Db,
    per_tenant_concurrency: usize,
    visibility_timeout: Duration,
    in_flight_by_tenant: Mutex<HashMap<String, usize>>,
}

impl JobQueue {
    pub fn new(db: Db, per_tenant_concurrency: usize, visibility_timeout: Duration) -> Self {
        JobQueue {
            db,
            per_tenant_concurrency,
            visibility_timeout,
            in_flight_by_tenant: Mutex::new(HashMap::new()),
        }
    }

    pub fn enqueue(
        &self,
        tenant_id: &str,
        job_type: JobType,
        payload: &serde_json::Value,
        priority: Priority,
        deadline: Option<chrono::DateTime<Utc>>,
    ) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "INSERT INTO jobs (id, tenant_id, job_type, payload, priority, priority_rank, attempt_count, next_attempt_at, status, deadline_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 'pending', ?8, ?7)",
            params![
                id,
                tenant_id,
                job_type.as_str(),
                payload.to_string(),
                priority.as_str(),
                priority.rank(),
                now,
                deadline.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(id)
    }

    /// Claims the highest-priority, oldest eligible job whose tenant is
    /// currently under the concurrency cap. Returns `None` if nothing is
    /// claimable right now (empty queue, or every candidate's tenant is at
    /// cap).
    pub fn dequeue(&self) -> Result<Option<Job>, AppError> {
        let conn = self.db.conn();
        let now = Utc::now();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, job_type, payload, priority, attempt_count, next_attempt_at, status, deadline_at
             FROM jobs
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY priority_rank DESC, created_at ASC
             LIMIT 50",
        )?;
        let candidates: Vec<Job> = stmt
            .query_map(params![now.to_rfc3339()], map_job)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut in_flight = self.in_flight_by_tenant.lock().unwrap_or_else(|e| e.into_inner());

        for job in candidates {
            let count = in_flight.get(&job.tenant_id).copied().unwrap_or(0);
            if count >= self.per_tenant_concurrency {
                continue;
            }

            let locked_until = (now + chrono::Duration::from_std(self.visibility_timeout).unwrap()).to_rfc3339();
            let claimed = conn.execute(
                "UPDATE jobs SET status = 'in_flight', locked_until = ?1 WHERE id = ?2 AND status = 'pending'",
                params![locked_until, job.id],
            )?;
            if claimed == 1 {
                *in_flight.entry(job.tenant_id.clone()).or_insert(0) += 1;
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    pub fn complete(&self, job: &Job) -> Result<(), AppError> {
        self.db
            .conn()
            .execute("UPDATE jobs SET status = 'succeeded' WHERE id = ?1", params![job.id])?;
        self.release_slot(&job.tenant_id);
        Ok(())
    }

    /// Cooperative deadline cancellation (spec §4.5, §5).
    pub fn cancel_deadline(&self, job: &Job) -> Result<(), AppError> {
        self.db.conn().execute(
            "UPDATE jobs SET status = 'dead' WHERE id = ?1",
            params![job.id],
        )?;
        dead_letters::insert(&self.db, &job.id, &job.tenant_id, &job.job_type, &job.payload, "CANCELLED_DEADLINE")?;
        self.release_slot(&job.tenant_id);
        Ok(())
    }

    /// On failure: schedule a retry with jittered exponential backoff, or
    /// dead-letter if attempts are exhausted for this job type (spec §4.5).
    pub fn fail(&self, job: &Job, error: &str) -> Result<(), AppError> {
        let job_type = JobType::parse(&job.job_type).unwrap_or(JobType::Cleanup);
        let attempt_count = job.attempt_count + 1;

        if attempt_count >= job_type.max_attempts() {
            self.db
                .conn()
                .execute("UPDATE jobs SET status = 'dead', attempt_count = ?1 WHERE id = ?2", params![attempt_count, job.id])?;
            dead_letters::insert(&self.db, &job.id, &job.tenant_id, &job.job_type, &job.payload, error)?;
        } else {
            let backoff = (BASE_BACKOFF_SECS * 2f64.powi(attempt_count as i32)).min(MAX_BACKOFF_SECS);
            let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
            let delay_secs = (backoff * (1.0 + jitter)).max(0.0);
            let next_attempt_at = (Utc::now() + chrono::Duration::milliseconds((delay_secs * 1000.0) as i64)).to_rfc3339();

            self.db.conn().execute(
                "UPDATE jobs SET status = 'pending', attempt_count = ?1, next_attempt_at = ?2 WHERE id = ?3",
                params![attempt_count, next_attempt_at, job.id],
            )?;
        }
        self.release_slot(&job.tenant_id);
        Ok(())
    }

    /// Dead-letters a job immediately, bypassing the retry schedule — for
    /// classified non-retryable failures (spec §7 propagation policy).
    pub fn dead_letter_immediately(&self, job: &Job, error: &str) -> Result<(), AppError> {
        self.db
            .conn()
            .execute("UPDATE jobs SET status = 'dead' WHERE id = ?1", params![job.id])?;
        dead_letters::insert(&self.db, &job.id, &job.tenant_id, &job.job_type, &job.payload, error)?;
        self.release_slot(&job.tenant_id);
        Ok(())
    }

    fn release_slot(&self, tenant_id: &str) {
        let mut in_flight = self.in_flight_by_tenant.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = in_flight.get_mut(tenant_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Visibility-timeout reaper: jobs stuck `in_flight` past their lock
    /// become visible again (at-least-once delivery, spec §4.5).
    pub fn reap_expired(&self) -> Result<usize, AppError> {
        let now = Utc::now().to_rfc3339();
        let n = self.db.conn().execute(
            "UPDATE jobs SET status = 'pending' WHERE status = 'in_flight' AND locked_until < ?1",
            params![now],
        )?;
        Ok(n)
    }

    pub fn admin_scope(&self) -> TenantScope {
        TenantScope::admin(self.db.conn())
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn map_job(r: &rusqlite::Row) -> rusqlite::Result<Job> {
    let payload_str: String = r.get(3)?;
    Ok(Job {
        id: r.get(0)?,
        tenant_id: r.get(1)?,
        job_type: r.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        priority: r.get(4)?,
        attempt_count: r.get(5)?,
        next_attempt_at: r.get(6)?,
        status: r.get(7)?,
        deadline_at: r.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    fn seed_tenant(db: &Db, tenant_id: &str) {
        db.conn()
            .execute(
                "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
                params![tenant_id],
            )
            .unwrap();
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let q = JobQueue::new(db, 16, Duration::from_secs(30));
        q.enqueue("t1", JobType::Cleanup, &serde_json::json!({}), Priority::Low, None).unwrap();
        q.enqueue("t1", JobType::Cleanup, &serde_json::json!({}), Priority::Urgent, None).unwrap();
        let job = q.dequeue().unwrap().unwrap();
        assert_eq!(job.priority, "urgent");
    }

    #[test]
    fn per_tenant_cap_defers_excess_jobs() {
        let db = test_db();
        seed_tenant(&db, "t1");
        seed_tenant(&db, "t2");
        let q = JobQueue::new(db, 1, Duration::from_secs(30));
        q.enqueue("t1", JobType::Cleanup, &serde_json::json!({}), Priority::Normal, None).unwrap();
        q.enqueue("t1", JobType::Cleanup, &serde_json::json!({}), Priority::Normal, None).unwrap();
        q.enqueue("t2", JobType::Cleanup, &serde_json::json!({}), Priority::Normal, None).unwrap();

        let first = q.dequeue().unwrap().unwrap();
        assert_eq!(first.tenant_id, "t1");
        // t1 is now at cap; next claimable job should belong to t2.
        let second = q.dequeue().unwrap().unwrap();
        assert_eq!(second.tenant_id, "t2");
    }

    #[test]
    fn exhausted_attempts_dead_letter() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let q = JobQueue::new(db, 16, Duration::from_secs(30));
        q.enqueue("t1", JobType::GenerateReply, &serde_json::json!({}), Priority::Normal, None).unwrap();
        for _ in 0..3 {
            let job = q.dequeue().unwrap().unwrap();
            q.fail(&job, "upstream down").unwrap();
        }
        let status: String = q
            .db
            .conn()
            .query_row("SELECT status FROM jobs LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "dead");
        let dead_count: i64 = q.db.conn().query_row("SELECT COUNT(*) FROM dead_letters", [], |r| r.get(0)).unwrap();
        assert_eq!(dead_count, 1);
    }

    #[test]
    fn expired_visibility_timeout_becomes_visible_again() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let q = JobQueue::new(db, 16, Duration::from_millis(0));
        q.enqueue("t1", JobType::Cleanup, &serde_json::json!({}), Priority::Normal, None).unwrap();
        q.dequeue().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let reaped = q.reap_expired().unwrap();
        assert_eq!(reaped, 1);
    }
}

//! Worker pool: one logical job at a time per worker, parallel across
//! workers (spec §5). Suspension points each honor the job's soft deadline;
//! crossing it marks the job `CANCELLED_DEADLINE` instead of forcing
//! termination. Grounded on the teacher's `retention.rs` `tokio::spawn`
//! background-loop shape, generalized from one fixed sweep to a dequeue
//! loop with per-job-type dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::ai;
use crate::context::AppContext;
use crate::db::models::{Job, JobType};
use crate::delivery;
use crate::error::AppError;
use crate::webhook;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const CLEANUP_JOB_DEADLINE_SECS: i64 = 300;

/// Per-conversation advisory lock (spec §5, §8: at most one outbound send
/// in flight per conversation). `generate_reply` and `deliver_outbound`
/// each acquire the same conversation's lock for their own duration rather
/// than holding it across the queue hop between them — the two jobs are
/// independently schedulable by design (§9: the orchestrator never calls
/// the bridge synchronously) — which still serializes any overlapping
/// attempt against the same conversation.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    pub fn get(&self, conversation_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub async fn run_worker_pool(ctx: Arc<AppContext>, concurrency: usize) {
    let mut handles = Vec::with_capacity(concurrency + 1);

    for worker_id in 0..concurrency {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(ctx, worker_id).await;
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            reaper_loop(ctx).await;
        }));
    }

    {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            cleanup_scheduler_loop(ctx).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(ctx: Arc<AppContext>, worker_id: usize) {
    loop {
        match ctx.queue.dequeue() {
            Ok(Some(job)) => {
                if deadline_passed(&job) {
                    tracing::warn!(job_id = %job.id, job_type = %job.job_type, "job exceeded deadline before dispatch");
                    let _ = ctx.queue.cancel_deadline(&job);
                    continue;
                }
                dispatch(&ctx, job).await;
            }
            Ok(None) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "dequeue failed");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reaper_loop(ctx: Arc<AppContext>) {
    loop {
        tokio::time::sleep(REAP_INTERVAL).await;
        match ctx.queue.reap_expired() {
            Ok(n) if n > 0 => tracing::info!(reaped = n, "visibility timeout reaper requeued jobs"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "reaper sweep failed"),
        }
    }
}

/// Mirrors the teacher's `retention.rs` periodic-sweep loop, but enqueues a
/// durable `cleanup` job instead of sweeping inline — the sweep itself then
/// runs through the ordinary worker pool like any other job.
async fn cleanup_scheduler_loop(ctx: Arc<AppContext>) {
    loop {
        tokio::time::sleep(CLEANUP_INTERVAL).await;
        let deadline = Some(crate::queue::deadline_after(CLEANUP_JOB_DEADLINE_SECS));
        match ctx.queue.enqueue("system", JobType::Cleanup, &serde_json::json!({}), crate::db::models::Priority::Low, deadline) {
            Ok(id) => tracing::info!(job_id = %id, "scheduled periodic cleanup job"),
            Err(e) => tracing::error!(error = %e, "failed to schedule cleanup job"),
        }
    }
}

fn deadline_passed(job: &Job) -> bool {
    job.deadline_at
        .as_deref()
        .and_then(|d| d.parse::<chrono::DateTime<Utc>>().ok())
        .map(|deadline| Utc::now() > deadline)
        .unwrap_or(false)
}

async fn dispatch(ctx: &Arc<AppContext>, job: Job) {
    let started = std::time::Instant::now();
    let job_type = job.job_type.clone();

    let result = match JobType::parse(&job.job_type) {
        Some(JobType::ProcessWebhook) => webhook::router::handle_process_webhook_job(ctx, &job).await,
        Some(JobType::GenerateReply) => ai::handle_generate_reply_job(ctx, &job).await,
        Some(JobType::DeliverOutbound) => delivery::handle_deliver_outbound_job(ctx, &job).await,
        Some(JobType::FollowUp) => handle_follow_up_job(ctx, &job).await,
        Some(JobType::Cleanup) => handle_cleanup_job(ctx, &job).await,
        None => Err(AppError::Internal(format!("unknown job_type: {}", job.job_type))),
    };

    let latency_ms = started.elapsed().as_millis();
    match result {
        Ok(()) => {
            crate::telemetry::log_outcome("worker", &job.id, Some(&job.tenant_id), "succeeded", latency_ms, None);
            let _ = ctx.queue.complete(&job);
        }
        Err(e) => {
            crate::telemetry::log_outcome("worker", &job.id, Some(&job.tenant_id), "failed", latency_ms, Some(e.code()));
            if e.is_retryable() {
                let _ = ctx.queue.fail(&job, &e.to_string());
            } else {
                let _ = ctx.queue.dead_letter_immediately(&job, &e.to_string());
            }
        }
    }

    let _ = job_type;
}

/// `follow_up` jobs land here for manual/operator handling — this pipeline
/// has no human-in-the-loop UI in scope, so the handler's job is simply to
/// make the need for one durable and observable via the audit trail.
async fn handle_follow_up_job(ctx: &Arc<AppContext>, job: &Job) -> Result<(), AppError> {
    crate::db::audit::AuditWriter::record(
        &ctx.db,
        "system",
        Some(&job.tenant_id),
        "follow_up.raised",
        job.payload.get("conversation_id").and_then(|v| v.as_str()).unwrap_or("unknown"),
        None,
        Some(job.payload.to_string().as_bytes()),
    )?;
    Ok(())
}

async fn handle_cleanup_job(ctx: &Arc<AppContext>, _job: &Job) -> Result<(), AppError> {
    let swept = crate::db::webhook_events::sweep_expired(&ctx.db)?;
    tracing::info!(swept, "cleanup job swept expired webhook_events");
    Ok(())
}

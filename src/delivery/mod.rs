//! C11 — Delivery Bridge: picks ManyChat vs direct Graph, enforces the
//! 24h window, and falls back across channels (spec §4.11). Grounded on
//! the teacher's `webhooks.rs` dispatcher for the "classify, retry, record"
//! shape, generalized from a single outbound target to a two-channel
//! fallback chain gated by C6/C7.

pub mod graph;
pub mod manychat;

use std::sync::Arc;

use crate::breaker::Permit;
use crate::context::AppContext;
use crate::db::models::{Job, JobType, Priority};
use crate::db::outbound::OutboundCandidate;
use crate::db::window::WindowTracker;
use crate::db::{conversations, delivery_logs, outbound, tenants, TenantScope};
use crate::error::AppError;
use crate::queue::deadline_after;
use crate::ratelimit::Acquire;

const FOLLOW_UP_DEADLINE_SECS: i64 = 60;

use graph::GraphError;
use manychat::ManyChatError;

pub struct DeliveryOutcome {
    pub channel: &'static str,
    pub upstream_message_id: String,
}

pub async fn handle_deliver_outbound_job(ctx: &Arc<AppContext>, job: &Job) -> Result<(), AppError> {
    let candidate_id = job
        .payload
        .get("candidate_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("deliver_outbound payload missing candidate_id".into()))?;

    let scope = TenantScope::new(ctx.db.conn(), job.tenant_id.clone());
    let candidate = outbound::find(&scope, candidate_id)?;
    let conversation = conversations::get(&scope, &candidate.conversation_id)?;

    let lock = ctx.conversation_locks.get(&conversation.id);
    let _guard = lock.lock().await;

    match deliver(ctx, &scope, &candidate, &conversation.customer_id).await {
        Ok(outcome) => {
            outbound::set_status(&scope, &candidate.id, "sent")?;
            conversations::append_message(
                &scope,
                &conversation,
                "outbound",
                Some(&outcome.upstream_message_id),
                &candidate.content,
                "text",
            )?;
            delivery_logs::record(
                &scope,
                &job.id,
                &conversation.id,
                outcome.channel,
                "sent",
                Some(&outcome.upstream_message_id),
                job.attempt_count + 1,
                0,
                None,
            )?;
            Ok(())
        }
        Err(AppError::Policy(reason)) => {
            outbound::set_status(&scope, &candidate.id, "failed")?;
            delivery_logs::record(&scope, &job.id, &conversation.id, "none", "deferred", None, job.attempt_count + 1, 0, Some(&reason))?;
            ctx.queue.enqueue(
                &job.tenant_id,
                JobType::FollowUp,
                &serde_json::json!({"conversation_id": conversation.id, "candidate_id": candidate.id, "reason": reason}),
                Priority::Normal,
                Some(deadline_after(FOLLOW_UP_DEADLINE_SECS)),
            )?;
            Ok(())
        }
        Err(AppError::UpstreamTerminal(reason)) => {
            outbound::set_status(&scope, &candidate.id, "failed")?;
            delivery_logs::record(&scope, &job.id, &conversation.id, "none", "failed", None, job.attempt_count + 1, 0, Some(&reason))?;
            ctx.queue.enqueue(
                &job.tenant_id,
                JobType::FollowUp,
                &serde_json::json!({"conversation_id": conversation.id, "candidate_id": candidate.id, "reason": reason}),
                Priority::Normal,
                Some(deadline_after(FOLLOW_UP_DEADLINE_SECS)),
            )?;
            Ok(())
        }
        Err(e) => Err(e), // transient/internal: let the job queue retry
    }
}

/// Channel-selection + window-enforcement core, shared by the async job
/// path above and the synchronous `/api/v1/send` route.
pub async fn deliver(
    ctx: &Arc<AppContext>,
    scope: &TenantScope,
    candidate: &OutboundCandidate,
    recipient: &str,
) -> Result<DeliveryOutcome, AppError> {
    let tenant = tenants::get(&ctx.db, scope.tenant_id())?;
    let window = WindowTracker::new(ctx.config.window_hours, ctx.config.window_grace_minutes);
    let within_window = window.within_window(scope, recipient)?;

    let manychat_enabled = tenant.config.get("manychat").and_then(|m| m.get("enabled")).and_then(|v| v.as_bool()).unwrap_or(false);

    // Free-form content only ever goes out within the window (spec §8); out
    // of window, ManyChat has no template surface of its own, so only the
    // Graph fallback (which does) is attempted.
    if within_window && manychat_enabled && !matches!(ctx.breaker.permit("manychat"), Permit::FailFast) {
        if let Acquire::Wait(d) = ctx.rate_limiter.acquire(scope.tenant_id(), "manychat", "send", 1.0, 10.0, 2.0) {
            tokio::time::sleep(d).await;
        }
        let adapter = manychat::ManyChatAdapter::new(&ctx.config);
        match adapter.send(recipient, &candidate.content, "ACCOUNT_UPDATE", None, &candidate.idempotency_key).await {
            Ok(upstream_message_id) => {
                ctx.breaker.record_result("manychat", true);
                return Ok(DeliveryOutcome { channel: "manychat", upstream_message_id });
            }
            Err(ManyChatError::Transient(reason)) => {
                tracing::warn!(reason, "manychat transient failure, falling back to graph");
                ctx.breaker.record_result("manychat", false);
            }
            Err(ManyChatError::Terminal(reason)) => {
                // Semantic 4xx: recorded, not retried on manychat, not a breaker failure.
                tracing::warn!(reason, "manychat terminal rejection, falling back to graph");
            }
        }
    }

    send_via_graph(ctx, scope, candidate, recipient, &tenant.config, within_window).await
}

async fn send_via_graph(
    ctx: &Arc<AppContext>,
    scope: &TenantScope,
    candidate: &OutboundCandidate,
    recipient: &str,
    tenant_config: &serde_json::Value,
    within_window: bool,
) -> Result<DeliveryOutcome, AppError> {
    if matches!(ctx.breaker.permit("graph"), Permit::FailFast) {
        return Err(AppError::UpstreamTransient("graph circuit breaker open".into()));
    }

    if let Acquire::Wait(d) = ctx.rate_limiter.acquire(scope.tenant_id(), "graph", "send", 1.0, 10.0, 2.0) {
        tokio::time::sleep(d).await;
    }

    let adapter = graph::GraphAdapter::new();
    let result = if within_window {
        adapter.send_text(scope, &ctx.encryption_key, recipient, &candidate.content, &candidate.idempotency_key).await
    } else {
        let template_id = tenant_config
            .get("templates")
            .and_then(|t| candidate.intent.as_ref().and_then(|i| t.get(i)))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Policy("TEMPLATE_REQUIRED".into()))?;
        adapter
            .send_template(scope, &ctx.encryption_key, recipient, template_id, &serde_json::json!({}), &candidate.idempotency_key)
            .await
    };

    match result {
        Ok(outcome) => {
            ctx.breaker.record_result("graph", true);
            if let Some(pct) = outcome.usage_pct {
                ctx.rate_limiter.report_usage(scope.tenant_id(), "graph", "send", pct);
            }
            Ok(DeliveryOutcome { channel: "graph_direct", upstream_message_id: outcome.upstream_message_id })
        }
        Err(GraphError::TokenExpired) => {
            if let Err(e) = adapter.refresh_token(scope, &ctx.encryption_key).await {
                // spec §4.13: a refresh failure trips C7 for this endpoint class.
                ctx.breaker.record_result("graph", false);
                return Err(e);
            }
            // Retry once post-refresh; a second expiry trips the breaker as terminal.
            if let Acquire::Wait(d) = ctx.rate_limiter.acquire(scope.tenant_id(), "graph", "send", 1.0, 10.0, 2.0) {
                tokio::time::sleep(d).await;
            }
            let retried = if within_window {
                adapter.send_text(scope, &ctx.encryption_key, recipient, &candidate.content, &candidate.idempotency_key).await
            } else {
                Err(GraphError::Terminal("template required but token just refreshed".into()))
            };
            match retried {
                Ok(outcome) => {
                    ctx.breaker.record_result("graph", true);
                    Ok(DeliveryOutcome { channel: "graph_direct", upstream_message_id: outcome.upstream_message_id })
                }
                Err(e) => {
                    ctx.breaker.record_result("graph", false);
                    Err(e.into())
                }
            }
        }
        Err(GraphError::Transient(reason)) => {
            ctx.breaker.record_result("graph", false);
            Err(AppError::UpstreamTransient(reason))
        }
        Err(e @ GraphError::Terminal(_)) => Err(e.into()),
    }
}

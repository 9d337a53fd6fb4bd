//! C10 — AI Orchestrator. Builds conversation context, calls the external
//! LLM through the rate limiter and circuit breaker, extracts a reply, and
//! hands it off to the Delivery Bridge purely via the job queue — never a
//! synchronous call (spec §4.10, §9).

pub mod llm_client;
pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::breaker::Permit;
use crate::context::AppContext;
use crate::db::models::{Job, JobType, Priority};
use crate::db::{conversations, outbound, tenants, TenantScope};
use crate::error::AppError;
use crate::queue::deadline_after;
use crate::ratelimit::Acquire;

use llm_client::ChatMessage;

const HISTORY_LIMIT: i64 = 20;
/// Ceiling on any single LLM call, and the fallback when a job carries no
/// deadline. The per-call timeout actually used is derived from the job's
/// own deadline (spec §5) and never exceeds this.
const LLM_TIMEOUT: Duration = Duration::from_secs(15);
const LLM_UPSTREAM: &str = "llm";
const FOLLOW_UP_DEADLINE_SECS: i64 = 60;
const DELIVER_OUTBOUND_DEADLINE_SECS: i64 = 20;

#[derive(Deserialize)]
struct ExtractedReply {
    reply: String,
    intent: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    #[allow(dead_code)]
    tags: Vec<String>,
}

pub async fn handle_generate_reply_job(ctx: &Arc<AppContext>, job: &Job) -> Result<(), AppError> {
    let conversation_id = job
        .payload
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("generate_reply payload missing conversation_id".into()))?;

    let lock = ctx.conversation_locks.get(conversation_id);
    let _guard = lock.lock().await;

    let scope = TenantScope::new(ctx.db.conn(), job.tenant_id.clone());
    let conversation = conversations::get(&scope, conversation_id)?;
    let tenant = tenants::get(&ctx.db, &job.tenant_id)?;
    let history = conversations::recent_messages(&scope, conversation_id, HISTORY_LIMIT)?;

    let system_prompt = build_system_prompt(&tenant.config);
    let mut messages = vec![ChatMessage { role: "system".into(), content: system_prompt }];
    for m in &history {
        let role = if m.direction == "inbound" { "user" } else { "assistant" };
        messages.push(ChatMessage { role: role.into(), content: m.content.clone() });
    }

    let raw_reply = call_llm_gated(ctx, &job.tenant_id, &messages, job.deadline_at.as_deref()).await?;

    let (content, intent, confidence, extraction_failed) = match serde_json::from_str::<ExtractedReply>(&raw_reply) {
        Ok(extracted) => (extracted.reply, extracted.intent, extracted.confidence, false),
        Err(_) => (raw_reply, None, None, true),
    };

    let deny_list = tenant
        .config
        .get("policy")
        .and_then(|p| p.get("deny_list"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>())
        .unwrap_or_default();

    let candidate = outbound::insert(&scope, conversation_id, &content, intent.as_deref(), confidence)?;

    if extraction_failed || policy::violates_policy(&content, &deny_list) {
        outbound::set_status(&scope, &candidate.id, "abandoned_policy")?;
        ctx.queue.enqueue(
            &job.tenant_id,
            JobType::FollowUp,
            &serde_json::json!({"conversation_id": conversation_id, "candidate_id": candidate.id, "reason": "policy_or_extraction"}),
            Priority::Normal,
            Some(deadline_after(FOLLOW_UP_DEADLINE_SECS)),
        )?;
        return Ok(());
    }

    ctx.queue.enqueue(
        &job.tenant_id,
        JobType::DeliverOutbound,
        &serde_json::json!({"candidate_id": candidate.id}),
        Priority::High,
        Some(deadline_after(DELIVER_OUTBOUND_DEADLINE_SECS)),
    )?;

    Ok(())
}

fn build_system_prompt(tenant_config: &serde_json::Value) -> String {
    let tone = tenant_config.get("tone").and_then(|v| v.as_str()).unwrap_or("professional");
    let language = tenant_config.get("language").and_then(|v| v.as_str()).unwrap_or("en");
    format!(
        "You are a customer-support assistant. Tone: {tone}. Respond in language code: {language} (support regional Arabic variants when requested). \
         Refuse requests for discounts beyond policy, medical/legal advice, or anything outside the merchant's catalog. \
         If you cannot reply in the requested language, fall back to the merchant's configured template language. \
         Respond ONLY as JSON: {{\"reply\": string, \"intent\": string|null, \"confidence\": number|null, \"tags\": string[]}}."
    )
}

/// The absolute time budget left for the job, derived from its own deadline
/// rather than a fixed constant (spec §5). Falls back to `LLM_TIMEOUT` for
/// jobs with no deadline, and is always clamped to it as a ceiling.
fn remaining_budget(deadline_at: Option<&str>) -> Duration {
    let Some(remaining) = deadline_at
        .and_then(|d| d.parse::<chrono::DateTime<Utc>>().ok())
        .map(|deadline| deadline - Utc::now())
    else {
        return LLM_TIMEOUT;
    };
    remaining.to_std().unwrap_or(Duration::from_secs(0)).min(LLM_TIMEOUT)
}

/// Gates the LLM call through C6 (rate limiter) and C7 (circuit breaker),
/// with one internal retry on timeout before escalating (spec §4.10 step 3).
async fn call_llm_gated(
    ctx: &Arc<AppContext>,
    tenant_id: &str,
    messages: &[ChatMessage],
    deadline_at: Option<&str>,
) -> Result<String, AppError> {
    match ctx.breaker.permit(LLM_UPSTREAM) {
        Permit::FailFast => return Err(AppError::UpstreamTransient("llm circuit breaker open".into())),
        Permit::Go | Permit::Probe => {}
    }

    let budget = remaining_budget(deadline_at);

    if let Acquire::Wait(d) = ctx.rate_limiter.acquire(tenant_id, LLM_UPSTREAM, "chat_completion", 1.0, 10.0, 2.0) {
        tokio::time::sleep(d.min(budget)).await;
    }

    let budget = remaining_budget(deadline_at);
    let first = ctx.llm.complete(messages, budget).await;
    match first {
        Ok(content) => {
            ctx.breaker.record_result(LLM_UPSTREAM, true);
            Ok(content)
        }
        Err(AppError::UpstreamTransient(reason)) => {
            tracing::warn!(reason, "llm call timed out or transient-failed, retrying once");
            ctx.breaker.record_result(LLM_UPSTREAM, false);
            let retry_budget = remaining_budget(deadline_at);
            match ctx.llm.complete(messages, retry_budget).await {
                Ok(content) => {
                    ctx.breaker.record_result(LLM_UPSTREAM, true);
                    Ok(content)
                }
                Err(e) => {
                    if matches!(e, AppError::UpstreamTransient(_)) {
                        ctx.breaker.record_result(LLM_UPSTREAM, false);
                    }
                    Err(e)
                }
            }
        }
        Err(e) => Err(e), // semantic 4xx: not a breaker failure (spec §4.7)
    }
}

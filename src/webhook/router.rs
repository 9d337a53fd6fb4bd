//! C4 — Webhook Router: body-size ceiling, signature verification,
//! idempotent claim, envelope parsing, and one `process_webhook` job per
//! interaction (spec §4.4). The worker-side counterpart,
//! `handle_process_webhook_job`, persists the conversation/message and
//! enqueues `generate_reply`.

use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::context::AppContext;
use crate::crypto::signature;
use crate::db::models::{Job, JobType, Priority};
use crate::db::{conversations, webhook_events, TenantScope};
use crate::error::AppError;
use crate::kv::idempotency::{self, ClaimOutcome};
use crate::queue::deadline_after;

use super::envelope::{self, Interaction, InteractionKind};

pub const MAX_BODY_BYTES: usize = 512 * 1024;

/// Persisting + dispatching a single interaction never needs to hold a
/// worker for long; 30s covers the DB writes handle_process_webhook_job
/// does before handing off to generate_reply.
const PROCESS_WEBHOOK_DEADLINE_SECS: i64 = 30;
/// generate_reply's deadline has to cover an LLM call plus one retry.
const GENERATE_REPLY_DEADLINE_SECS: i64 = 45;

#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Duplicate,
}

/// Full C4 pipeline for one inbound delivery. Returns `Duplicate` without
/// any further side effects once C2 has already seen this body (spec §4.4
/// step 3, §8 idempotence law).
pub async fn ingest(
    ctx: &Arc<AppContext>,
    platform: &str,
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<IngestOutcome, AppError> {
    if raw_body.len() > MAX_BODY_BYTES {
        return Err(AppError::Validation("PAYLOAD_TOO_LARGE".into()));
    }

    let header = signature_header.ok_or_else(|| AppError::Auth("MISSING_SIGNATURE".into()))?;
    if secret.is_empty() {
        return Err(AppError::Internal("BAD_SECRET".into()));
    }
    signature::verify(raw_body, header, secret)?;

    let digest = hex::encode(Sha256::digest(raw_body));
    let event_id = digest.clone();

    if idempotency::claim(&ctx.kv, &event_id).await? == ClaimOutcome::Duplicate {
        webhook_events::record(&ctx.db, &event_id, platform, "duplicate", &digest)?;
        return Ok(IngestOutcome::Duplicate);
    }
    webhook_events::record(&ctx.db, &event_id, platform, "accepted", &digest)?;

    // A parse failure is NOT marked processed, so a corrected retry of the
    // same event id can still succeed (spec §4.4 edge case).
    let interactions = envelope::parse(raw_body)
        .map_err(|e| AppError::Validation(format!("MALFORMED_PAYLOAD: {e}")))?;

    for interaction in &interactions {
        let tenant_id = match ctx.tenant_resolver.resolve(&ctx.db, platform, &interaction.platform_account_id) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(platform_account_id = %interaction.platform_account_id, "unknown tenant for inbound interaction, dropping");
                continue;
            }
        };
        let payload = interaction_payload(platform, interaction);
        ctx.queue.enqueue(
            &tenant_id,
            JobType::ProcessWebhook,
            &payload,
            Priority::Normal,
            Some(deadline_after(PROCESS_WEBHOOK_DEADLINE_SECS)),
        )?;
    }

    webhook_events::mark_status(&ctx.db, &event_id, "processed")?;
    Ok(IngestOutcome::Accepted)
}

fn interaction_payload(platform: &str, interaction: &Interaction) -> serde_json::Value {
    match &interaction.kind {
        InteractionKind::Message { mid, text, attachment_type } => json!({
            "platform": platform,
            "customer_id": interaction.customer_id,
            "kind": "message",
            "mid": mid,
            "text": text,
            "attachment_type": attachment_type,
        }),
        InteractionKind::StoryMention { mid } => json!({
            "platform": platform,
            "customer_id": interaction.customer_id,
            "kind": "story_mention",
            "mid": mid,
        }),
        InteractionKind::Comment { comment_id, text } => json!({
            "platform": platform,
            "customer_id": interaction.customer_id,
            "kind": "comment",
            "comment_id": comment_id,
            "text": text,
        }),
    }
}

/// Worker-dispatched side of C4: persists the inbound message via C8 and
/// enqueues `generate_reply` (spec §4.4 → §4.10 handoff).
pub async fn handle_process_webhook_job(ctx: &Arc<AppContext>, job: &Job) -> Result<(), AppError> {
    let p = &job.payload;
    let platform = p.get("platform").and_then(|v| v.as_str()).ok_or_else(|| AppError::Internal("process_webhook payload missing platform".into()))?;
    let customer_id = p.get("customer_id").and_then(|v| v.as_str()).ok_or_else(|| AppError::Internal("process_webhook payload missing customer_id".into()))?;
    let kind = p.get("kind").and_then(|v| v.as_str()).unwrap_or("message");

    let scope = TenantScope::new(ctx.db.conn(), job.tenant_id.clone());
    let conversation = conversations::find_or_create_conversation(&scope, platform, customer_id)?;

    let (platform_message_id, content, message_type) = match kind {
        "story_mention" => {
            let mid = p.get("mid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            (Some(mid), String::new(), "story_reply".to_string())
        }
        "comment" => {
            let comment_id = p.get("comment_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let text = p.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            (Some(comment_id), text, "comment".to_string())
        }
        _ => {
            let mid = p.get("mid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let text = p.get("text").and_then(|v| v.as_str()).map(String::from).unwrap_or_default();
            let message_type = p
                .get("attachment_type")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| "text".to_string());
            (Some(mid), text, message_type)
        }
    };

    conversations::append_message(&scope, &conversation, "inbound", platform_message_id.as_deref(), &content, &message_type)?;

    ctx.queue.enqueue(
        &job.tenant_id,
        JobType::GenerateReply,
        &json!({"conversation_id": conversation.id}),
        Priority::Normal,
        Some(deadline_after(GENERATE_REPLY_DEADLINE_SECS)),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use hmac::{Hmac, Mac};
    use sha2::Sha256 as Sha256Hmac;

    fn sign(body: &[u8], secret: &[u8]) -> String {
        let mut mac = Hmac::<Sha256Hmac>::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn test_ctx(db_path: &str) -> Arc<AppContext> {
        Arc::new(AppContext::new(AppConfig::for_test(db_path)).unwrap())
    }

    fn seed_tenant_with_credential(ctx: &AppContext, tenant_id: &str, account_id: &str) {
        let conn = ctx.db.conn();
        conn.execute(
            "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
            rusqlite::params![tenant_id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO credentials (id, tenant_id, platform, platform_account_id, encrypted_token, active, created_at)
             VALUES (?1, ?2, 'instagram', ?3, X'00', 1, '2026-01-01T00:00:00Z')",
            rusqlite::params![uuid::Uuid::new_v4().to_string(), tenant_id, account_id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn happy_path_enqueues_one_job_per_interaction() {
        let ctx = test_ctx(&format!("/tmp/router_test_{}.db", uuid::Uuid::new_v4().simple()));
        seed_tenant_with_credential(&ctx, "t1", "IGBA1");
        let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","time":1700000000,"messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"timestamp":1700000000,"message":{"mid":"mid.1","text":"hello"}}]}]}"#;
        let secret = b"shhh";
        let header = sign(body, secret);

        let outcome = ingest(&ctx, "instagram", body, Some(&header), secret).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted);

        let pending: i64 = ctx
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs WHERE job_type = 'process_webhook'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_enqueues_nothing_more() {
        let ctx = test_ctx(&format!("/tmp/router_test_{}.db", uuid::Uuid::new_v4().simple()));
        seed_tenant_with_credential(&ctx, "t1", "IGBA1");
        let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"message":{"mid":"mid.1","text":"hello"}}]}]}"#;
        let secret = b"shhh";
        let header = sign(body, secret);

        assert_eq!(ingest(&ctx, "instagram", body, Some(&header), secret).await.unwrap(), IngestOutcome::Accepted);
        assert_eq!(ingest(&ctx, "instagram", body, Some(&header), secret).await.unwrap(), IngestOutcome::Duplicate);

        let count: i64 = ctx
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs WHERE job_type = 'process_webhook'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn invalid_signature_rejected_without_side_effects() {
        let ctx = test_ctx(&format!("/tmp/router_test_{}.db", uuid::Uuid::new_v4().simple()));
        let body = br#"{"object":"instagram","entry":[]}"#;
        let bad_header = format!("sha256={}", "0".repeat(64));

        assert!(ingest(&ctx, "instagram", body, Some(&bad_header), b"shhh").await.is_err());
        let count: i64 = ctx.db.conn().query_row("SELECT COUNT(*) FROM webhook_events", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn empty_envelope_is_accepted_with_zero_jobs() {
        let ctx = test_ctx(&format!("/tmp/router_test_{}.db", uuid::Uuid::new_v4().simple()));
        let body = br#"{"object":"instagram","entry":[]}"#;
        let secret = b"shhh";
        let header = sign(body, secret);
        assert_eq!(ingest(&ctx, "instagram", body, Some(&header), secret).await.unwrap(), IngestOutcome::Accepted);
        let count: i64 = ctx.db.conn().query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn body_over_ceiling_rejected() {
        let ctx = test_ctx(&format!("/tmp/router_test_{}.db", uuid::Uuid::new_v4().simple()));
        let oversized = vec![b'a'; MAX_BODY_BYTES + 1];
        let secret = b"shhh";
        let header = sign(&oversized, secret);
        let err = ingest(&ctx, "instagram", &oversized, Some(&header), secret).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}

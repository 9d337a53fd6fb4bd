//! `POST /api/v1/send` — operator/tenant-triggered outbound send, bypassing
//! the AI orchestrator (spec §6.1). Shares C11's `deliver()` core with the
//! job-queue path; persists an `outbound_candidates` row first so the send
//! is logged and retried the same way an AI-generated reply would be.

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{post, State};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::db::{conversations, delivery_logs, outbound, TenantScope};
use crate::delivery;
use crate::error::AppError;

use super::TenantAuth;

#[derive(Deserialize)]
pub struct SendRequest {
    pub conversation_id: String,
    pub content: String,
    pub intent: Option<String>,
}

#[post("/api/v1/send", data = "<body>")]
pub async fn send(
    ctx: &State<Arc<AppContext>>,
    auth: TenantAuth,
    body: Json<SendRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = ctx.inner().clone();
    let scope = TenantScope::new(ctx.db.conn(), auth.0.clone());

    let conversation = conversations::get(&scope, &body.conversation_id)?;
    let candidate = outbound::insert(&scope, &conversation.id, &body.content, body.intent.as_deref(), None)?;

    match delivery::deliver(&ctx, &scope, &candidate, &conversation.customer_id).await {
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
                "manual",
                &conversation.id,
                outcome.channel,
                "sent",
                Some(&outcome.upstream_message_id),
                1,
                0,
                None,
            )?;
            Ok(Json(json!({
                "candidate_id": candidate.id,
                "channel": outcome.channel,
                "upstream_message_id": outcome.upstream_message_id,
            })))
        }
        Err(e) => {
            outbound::set_status(&scope, &candidate.id, "failed")?;
            Err(e)
        }
    }
}

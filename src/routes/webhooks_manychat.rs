//! ManyChat webhook delivery endpoint. Same C4 pipeline as Instagram, keyed
//! by the ManyChat webhook secret instead of the Meta app secret (spec §4.1).

use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{post, State};
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::error::AppError;
use crate::webhook::router::{self, IngestOutcome};

use super::webhooks_instagram::XHubSignature256;
use super::RawBody;

#[post("/webhooks/manychat", data = "<raw>")]
pub async fn manychat_webhook(
    ctx: &State<Arc<AppContext>>,
    sig: XHubSignature256,
    raw: RawBody,
) -> (Status, Json<Value>) {
    let ctx = ctx.inner().clone();
    let Some(secret) = ctx.config.manychat_webhook_secret.as_ref() else {
        let err = AppError::Internal("BAD_SECRET".into());
        return (err.status(), Json(json!({"error": err.code()})));
    };

    match router::ingest(&ctx, "manychat", &raw.0, sig.0.as_deref(), secret.as_bytes()).await {
        Ok(IngestOutcome::Accepted) => (Status::Ok, Json(json!({"status": "EVENT_RECEIVED"}))),
        Ok(IngestOutcome::Duplicate) => (Status::Ok, Json(json!({"status": "EVENT_RECEIVED", "duplicate": true}))),
        Err(e) => (e.status(), Json(json!({"error": e.code()}))),
    }
}

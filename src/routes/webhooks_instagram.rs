//! Instagram webhook surface: the Meta verification handshake (`GET`) and
//! the signed event delivery (`POST`), both routed through C4 (spec §4.1,
//! §4.4, §6.1).

use std::sync::Arc;

use rocket::form::FromForm;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::webhook::router::{self, IngestOutcome};

use super::RawBody;

/// Meta's handshake query uses dotted field names (`hub.mode`, ...), which
/// aren't valid Rust identifiers — renamed via `#[field(name = ..)]`.
#[derive(FromForm)]
pub struct VerifyQuery {
    #[field(name = "hub.mode")]
    mode: String,
    #[field(name = "hub.verify_token")]
    verify_token: String,
    #[field(name = "hub.challenge")]
    challenge: String,
}

#[get("/webhooks/instagram?<query..>")]
pub fn instagram_verify(ctx: &State<Arc<AppContext>>, query: VerifyQuery) -> Result<String, Status> {
    if query.mode != "subscribe" {
        return Err(Status::BadRequest);
    }
    if query.verify_token != ctx.config.ig_verify_token {
        return Err(Status::Forbidden);
    }
    Ok(query.challenge)
}

#[post("/webhooks/instagram", data = "<raw>")]
pub async fn instagram_webhook(
    ctx: &State<Arc<AppContext>>,
    sig: XHubSignature256,
    raw: RawBody,
) -> (Status, Json<Value>) {
    let ctx = ctx.inner().clone();
    let secret = ctx.config.meta_app_secret.as_bytes();

    match router::ingest(&ctx, "instagram", &raw.0, sig.0.as_deref(), secret).await {
        Ok(IngestOutcome::Accepted) => (Status::Ok, Json(json!({"status": "EVENT_RECEIVED"}))),
        Ok(IngestOutcome::Duplicate) => (Status::Ok, Json(json!({"status": "EVENT_RECEIVED", "duplicate": true}))),
        Err(e) => (e.status(), Json(json!({"error": e.code()}))),
    }
}

/// A thin `FromRequest` wrapper so a missing header surfaces as `None`
/// rather than Rocket forwarding the request past a stricter guard.
pub struct XHubSignature256(pub Option<String>);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for XHubSignature256 {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r rocket::Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        rocket::request::Outcome::Success(XHubSignature256(
            req.headers().get_one("X-Hub-Signature-256").map(String::from),
        ))
    }
}

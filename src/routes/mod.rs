//! HTTP surface (spec §6.1). Grounded on the teacher's `routes.rs` request
//! guard shape (`ClientIp`/`AdminKey` as `FromRequest` impls, `State<T>`
//! for shared services), generalized to the new `AppContext` managed state
//! and a `RawBody` guard that preserves the exact bytes C1 must verify.

pub mod health;
pub mod security_headers;
pub mod send;
pub mod webhooks_instagram;
pub mod webhooks_manychat;

pub use health::health;
pub use send::send;
pub use webhooks_instagram::{instagram_verify, instagram_webhook};
pub use webhooks_manychat::manychat_webhook;

use rocket::data::{Data, FromData, Outcome as DataOutcome, ToByteUnit};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::context::AppContext;
use crate::db::tenants;
use crate::webhook::router::MAX_BODY_BYTES;

/// Preserves the raw request bytes exactly as received — no parsing,
/// whitespace stripping, or re-serialization — so C1 verifies what the
/// sender actually signed (spec §4.1).
pub struct RawBody(pub Vec<u8>);

#[rocket::async_trait]
impl<'r> FromData<'r> for RawBody {
    type Error = ();

    async fn from_data(_req: &'r Request<'_>, data: Data<'r>) -> DataOutcome<'r, Self> {
        // Read one byte past the ceiling so an exact-512KB body is accepted
        // and a 512KB+1 body is detected as over the limit (spec §8).
        let capped = data.open((MAX_BODY_BYTES as u64 + 1).bytes());
        match capped.into_bytes().await {
            Ok(bytes) if bytes.len() > MAX_BODY_BYTES => DataOutcome::Error((Status::PayloadTooLarge, ())),
            Ok(bytes) => DataOutcome::Success(RawBody(bytes.into_inner())),
            Err(_) => DataOutcome::Error((Status::InternalServerError, ())),
        }
    }
}

/// Minimal tenant bearer-auth for `/api/v1/send` (spec §6.1: "tenant
/// authenticated"). A full admin/tenant-operator auth subsystem is out of
/// scope (spec §1 excludes the admin web UI); this guard only asserts the
/// bearer token names an active tenant.
pub struct TenantAuth(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TenantAuth {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(tenant_id) = req.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let Some(ctx) = req.rocket().state::<std::sync::Arc<AppContext>>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match tenants::get(&ctx.db, tenant_id) {
            Ok(tenant) if tenant.status == "active" => Outcome::Success(TenantAuth(tenant_id.to_string())),
            Ok(_) => Outcome::Error((Status::Forbidden, ())),
            Err(_) => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

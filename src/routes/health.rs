//! `GET /health` — liveness/readiness probe (spec §6.1). Grounded on the
//! teacher's `routes/system.rs` health endpoint shape, generalized to report
//! each backing component instead of a single flat "ok".

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{get, State};
use serde_json::{json, Value};

use crate::context::AppContext;

#[get("/health")]
pub fn health(ctx: &State<Arc<AppContext>>) -> Json<Value> {
    let storage_ok = ctx.db.try_conn().is_ok();
    let kv_status = if ctx.kv.is_degraded() { "degraded" } else { "ok" };
    let queue_ok = ctx.db.try_conn().is_ok();

    let overall = if storage_ok && queue_ok { "ok" } else { "degraded" };

    Json(json!({
        "status": overall,
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "storage": if storage_ok { "ok" } else { "unavailable" },
            "queue": if queue_ok { "ok" } else { "unavailable" },
            "kv": kv_status,
        },
    }))
}

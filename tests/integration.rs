//! End-to-end HTTP tests against a real `Rocket` instance with an isolated
//! SQLite file per test, exercising the six scenarios in spec §8 that cross
//! the wire boundary (signature verification, idempotency, the Meta
//! handshake, and tenant-authenticated sends). Worker-pool job handling
//! itself is covered by the inline `#[cfg(test)]` suites in `webhook::router`
//! and `delivery`; these tests stay at the HTTP layer.

use std::sync::Arc;

use dm_relay::config::AppConfig;
use dm_relay::context::AppContext;
use hmac::{Hmac, Mac};
use rocket::http::{Header, Status};
use rocket::local::asynchronous::Client;
use sha2::Sha256;

fn test_db_path() -> String {
    format!("/tmp/dm_relay_integration_{}.db", uuid::Uuid::new_v4().simple())
}

fn sign(body: &[u8], secret: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn test_client() -> (Client, Arc<AppContext>) {
    let config = AppConfig::for_test(&test_db_path());
    let ctx = Arc::new(AppContext::new(config).unwrap());
    let rocket = dm_relay::rocket_with_context(ctx.clone());
    let client = Client::tracked(rocket).await.expect("valid rocket instance");
    (client, ctx)
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

#[rocket::async_test]
async fn health_reports_ok_components() {
    let (client, _ctx) = test_client().await;
    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["storage"], "ok");
}

#[rocket::async_test]
async fn instagram_handshake_echoes_challenge_on_matching_token() {
    let (client, _ctx) = test_client().await;
    let response = client
        .get("/webhooks/instagram?hub.mode=subscribe&hub.verify_token=test-verify-token&hub.challenge=abc123")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "abc123");
}

#[rocket::async_test]
async fn instagram_handshake_rejects_wrong_token() {
    let (client, _ctx) = test_client().await;
    let response = client
        .get("/webhooks/instagram?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=abc123")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);
}

#[rocket::async_test]
async fn instagram_handshake_rejects_wrong_mode() {
    let (client, _ctx) = test_client().await;
    let response = client
        .get("/webhooks/instagram?hub.mode=unsubscribe&hub.verify_token=test-verify-token&hub.challenge=abc123")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn instagram_webhook_missing_signature_is_rejected() {
    let (client, _ctx) = test_client().await;
    let response = client
        .post("/webhooks/instagram")
        .body(br#"{"object":"instagram","entry":[]}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn instagram_webhook_valid_signature_is_accepted_and_enqueues_a_job() {
    let (client, ctx) = test_client().await;
    seed_tenant_with_credential(&ctx, "t1", "IGBA1");

    let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"message":{"mid":"mid.1","text":"hi there"}}]}]}"#;
    let header = sign(body, b"test-app-secret");

    let response = client
        .post("/webhooks/instagram")
        .header(Header::new("X-Hub-Signature-256", header.clone()))
        .body(body.to_vec())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let pending: i64 = ctx
        .db
        .conn()
        .query_row("SELECT COUNT(*) FROM jobs WHERE job_type = 'process_webhook'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(pending, 1);

    // Redelivery of the identical body is idempotent (spec §8): no new job.
    let replay = client
        .post("/webhooks/instagram")
        .header(Header::new("X-Hub-Signature-256", header))
        .body(body.to_vec())
        .dispatch()
        .await;
    assert_eq!(replay.status(), Status::Ok);
    let still_one: i64 = ctx
        .db
        .conn()
        .query_row("SELECT COUNT(*) FROM jobs WHERE job_type = 'process_webhook'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(still_one, 1);
}

#[rocket::async_test]
async fn instagram_webhook_tampered_body_is_rejected() {
    let (client, ctx) = test_client().await;
    seed_tenant_with_credential(&ctx, "t1", "IGBA1");

    let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"message":{"mid":"mid.1","text":"hi"}}]}]}"#;
    let header = sign(body, b"test-app-secret");

    let response = client
        .post("/webhooks/instagram")
        .header(Header::new("X-Hub-Signature-256", header))
        .body(br#"{"object":"instagram","entry":[{"id":"IGBA1","messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"message":{"mid":"mid.1","text":"tampered"}}]}]}"#.to_vec())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn manychat_webhook_uses_its_own_secret() {
    let (client, ctx) = test_client().await;
    seed_tenant_with_credential(&ctx, "t1", "MC1");

    let body = br#"{"object":"instagram","entry":[{"id":"MC1","messaging":[{"sender":{"id":"U1"},"recipient":{"id":"MC1"},"message":{"mid":"mid.2","text":"hello"}}]}]}"#;
    let header = sign(body, b"test-manychat-secret");

    let response = client
        .post("/webhooks/manychat")
        .header(Header::new("X-Hub-Signature-256", header))
        .body(body.to_vec())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn send_without_bearer_token_is_unauthorized() {
    let (client, _ctx) = test_client().await;
    let response = client
        .post("/api/v1/send")
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"conversation_id":"nope","content":"hi"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn send_for_suspended_tenant_is_forbidden() {
    let (client, ctx) = test_client().await;
    ctx.db
        .conn()
        .execute(
            "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES ('t1', 'Acme', 'suspended', '{}', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

    let response = client
        .post("/api/v1/send")
        .header(Header::new("Authorization", "Bearer t1"))
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"conversation_id":"nope","content":"hi"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);
}

#[rocket::async_test]
async fn body_over_512kb_is_rejected_with_413() {
    let (client, ctx) = test_client().await;
    seed_tenant_with_credential(&ctx, "t1", "IGBA1");

    let oversized = vec![b'a'; 512 * 1024 + 1];
    let header = sign(&oversized, b"test-app-secret");

    let response = client
        .post("/webhooks/instagram")
        .header(Header::new("X-Hub-Signature-256", header))
        .body(oversized)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::PayloadTooLarge);
}

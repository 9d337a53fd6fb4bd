//! Credentials persistence (spec §3): encrypted long-lived access tokens,
//! never returned in cleartext outside this module.

use chrono::Utc;
use rusqlite::params;

use super::models::Credential;
use super::tenant::TenantScope;
use crate::crypto::aead::AeadKey;
use crate::error::AppError;

pub fn upsert(
    scope: &TenantScope,
    key: &AeadKey,
    platform: &str,
    platform_account_id: &str,
    plaintext_token: &[u8],
) -> Result<Credential, AppError> {
    let conn = scope.conn();
    let platform = platform.to_lowercase();
    let sealed = key.seal(plaintext_token)?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO credentials (id, tenant_id, platform, platform_account_id, encrypted_token, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
         ON CONFLICT(platform, platform_account_id) DO UPDATE SET
            encrypted_token = excluded.encrypted_token, active = 1",
        params![id, scope.tenant_id(), platform, platform_account_id, sealed, now],
    )?;

    Ok(Credential {
        id,
        tenant_id: scope.tenant_id().to_string(),
        platform,
        platform_account_id: platform_account_id.to_string(),
        encrypted_token: sealed,
        refresh_metadata: None,
        active: true,
    })
}

/// Decrypt and return the cleartext token for outbound adapter use
/// (`delivery::manychat`, `delivery::graph`) only — never serialized back
/// to an HTTP response.
pub fn decrypt_token(
    scope: &TenantScope,
    key: &AeadKey,
    platform: &str,
) -> Result<Vec<u8>, AppError> {
    let conn = scope.conn();
    let sealed: Vec<u8> = conn.query_row(
        "SELECT encrypted_token FROM credentials WHERE tenant_id = ?1 AND platform = ?2 AND active = 1",
        params![scope.tenant_id(), platform.to_lowercase()],
        |r| r.get(0),
    )?;
    key.open(&sealed)
}

pub fn get(scope: &TenantScope, platform: &str) -> Result<Credential, AppError> {
    scope
        .conn()
        .query_row(
            "SELECT id, tenant_id, platform, platform_account_id, encrypted_token, refresh_metadata, active
             FROM credentials WHERE tenant_id = ?1 AND platform = ?2 AND active = 1",
            params![scope.tenant_id(), platform.to_lowercase()],
            |r| {
                let refresh_metadata: Option<String> = r.get(5)?;
                Ok(Credential {
                    id: r.get(0)?,
                    tenant_id: r.get(1)?,
                    platform: r.get(2)?,
                    platform_account_id: r.get(3)?,
                    encrypted_token: r.get(4)?,
                    refresh_metadata: refresh_metadata.and_then(|s| serde_json::from_str(&s).ok()),
                    active: r.get::<_, i64>(6)? != 0,
                })
            },
        )
        .map_err(Into::into)
}

pub fn deactivate(scope: &TenantScope, credential_id: &str) -> Result<(), AppError> {
    scope
        .conn()
        .execute(
            "UPDATE credentials SET active = 0 WHERE id = ?1 AND tenant_id = ?2",
            params![credential_id, scope.tenant_id()],
        )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    fn seed_tenant(db: &crate::db::pool::Db, tenant_id: &str) {
        db.conn()
            .execute(
                "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
                params![tenant_id],
            )
            .unwrap();
    }

    #[test]
    fn token_round_trips_through_storage() {
        let db = test_db();
        seed_tenant(&db, "t1");
        let key = AeadKey::from_hex(&"cd".repeat(32)).unwrap();
        let scope = TenantScope::new(db.conn(), "t1");
        upsert(&scope, &key, "INSTAGRAM", "IGBA1", b"long-lived-token").unwrap();
        let token = decrypt_token(&scope, &key, "instagram").unwrap();
        assert_eq!(token, b"long-lived-token");
    }
}

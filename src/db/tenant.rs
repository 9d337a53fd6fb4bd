//! C3 — Tenant Resolver + the scoped tenant-context capability.
//!
//! REDESIGN FLAGS §9 asks for "scoped resource acquisition around a tenant
//! context... modeled as a scoped capability bound to a storage handle,
//! guaranteed released on every exit path, background work receives its
//! own explicit context, never inherits one." `TenantScope` is that
//! capability: it owns a pooled connection for its lifetime and is released
//! back to the pool by `Drop` (RAII) on every exit path, including panics,
//! exactly like the teacher's `AdminKey`/`ClientIp` request guards derive a
//! scoped value per-request and never leak across requests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rusqlite::params;

use super::pool::{Db, PooledConn};
use crate::error::AppError;

/// A storage handle scoped to exactly one tenant. Every tenant-scoped query
/// method lives on this type (or on thin wrappers in sibling `db::*`
/// modules that take `&TenantScope`) so call sites can never forget the
/// `tenant_id` filter — the enforcement point the teacher's SQLite engine
/// can't provide natively (see DESIGN.md Open Question #3).
pub struct TenantScope {
    conn: PooledConn,
    tenant_id: String,
    admin_mode: bool,
}

impl TenantScope {
    pub fn new(conn: PooledConn, tenant_id: impl Into<String>) -> Self {
        TenantScope {
            conn,
            tenant_id: tenant_id.into(),
            admin_mode: false,
        }
    }

    /// Admin-mode scope bypasses the `tenant_id` predicate (used only by
    /// operator-facing redrive/inspect paths in `queue::dead_letters`).
    pub fn admin(conn: PooledConn) -> Self {
        TenantScope {
            conn,
            tenant_id: String::new(),
            admin_mode: true,
        }
    }

    pub fn conn(&self) -> &PooledConn {
        &self.conn
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn admin_mode(&self) -> bool {
        self.admin_mode
    }
}

/// Positive/negative TTL cache entry.
enum CacheEntry {
    Found(String, Instant),
    NotFound(Instant),
}

/// Maps a platform account id to a tenant id, with short positive caching
/// (<=60s) and negative caching (<=10s) to resist enumeration (spec §4.3).
pub struct TenantResolver {
    cache: RwLock<HashMap<(String, String), CacheEntry>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl Default for TenantResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantResolver {
    pub fn new() -> Self {
        TenantResolver {
            cache: RwLock::new(HashMap::new()),
            positive_ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(10),
        }
    }

    /// Resolve `platform_account_id` to a tenant id, consulting the cache
    /// first. On a cache miss, checks out its own connection from `db` and
    /// returns it immediately after use (never held between calls).
    pub fn resolve(
        &self,
        db: &Db,
        platform: &str,
        platform_account_id: &str,
    ) -> Result<String, AppError> {
        let key = (platform.to_lowercase(), platform_account_id.to_string());

        if let Some(hit) = self.cache.read().unwrap().get(&key) {
            match hit {
                CacheEntry::Found(tenant_id, at) if at.elapsed() < self.positive_ttl => {
                    return Ok(tenant_id.clone());
                }
                CacheEntry::NotFound(at) if at.elapsed() < self.negative_ttl => {
                    return Err(AppError::Tenant("UNKNOWN_TENANT".into()));
                }
                _ => {}
            }
        }

        let conn = db.conn();
        let found: Option<String> = conn
            .query_row(
                "SELECT tenant_id FROM credentials
                 WHERE platform = ?1 AND platform_account_id = ?2 AND active = 1",
                params![key.0, platform_account_id],
                |r| r.get(0),
            )
            .ok();

        let mut cache = self.cache.write().unwrap();
        match found {
            Some(tenant_id) => {
                cache.insert(key, CacheEntry::Found(tenant_id.clone(), Instant::now()));
                Ok(tenant_id)
            }
            None => {
                cache.insert(key, CacheEntry::NotFound(Instant::now()));
                Err(AppError::Tenant("UNKNOWN_TENANT".into()))
            }
        }
    }

    /// Invalidate a cached mapping, e.g. on credential rotation/deactivation.
    pub fn invalidate(&self, platform: &str, platform_account_id: &str) {
        self.cache
            .write()
            .unwrap()
            .remove(&(platform.to_lowercase(), platform_account_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;
    use rusqlite::params;

    fn seed_tenant_with_credential(db: &Db, tenant_id: &str, account_id: &str) {
        let conn = db.conn();
        conn.execute(
            "INSERT INTO tenants (id, display_name, status, config, created_at)
             VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
            params![tenant_id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO credentials (id, tenant_id, platform, platform_account_id, encrypted_token, active, created_at)
             VALUES (?1, ?2, 'instagram', ?3, X'00', 1, '2026-01-01T00:00:00Z')",
            params![uuid::Uuid::new_v4().to_string(), tenant_id, account_id],
        )
        .unwrap();
    }

    #[test]
    fn resolves_known_account() {
        let db = test_db();
        seed_tenant_with_credential(&db, "t1", "IGBA1");
        let resolver = TenantResolver::new();
        assert_eq!(resolver.resolve(&db, "instagram", "IGBA1").unwrap(), "t1");
    }

    #[test]
    fn unknown_account_errors() {
        let db = test_db();
        let resolver = TenantResolver::new();
        assert!(resolver.resolve(&db, "instagram", "nope").is_err());
    }

    #[test]
    fn caches_positive_result() {
        let db = test_db();
        seed_tenant_with_credential(&db, "t1", "IGBA1");
        let resolver = TenantResolver::new();
        assert_eq!(resolver.resolve(&db, "instagram", "IGBA1").unwrap(), "t1");
        // Deactivate underneath the cache; cached hit should still win within TTL.
        db.conn()
            .execute("UPDATE credentials SET active = 0 WHERE platform_account_id = 'IGBA1'", [])
            .unwrap();
        assert_eq!(resolver.resolve(&db, "instagram", "IGBA1").unwrap(), "t1");
    }
}

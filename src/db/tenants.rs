//! Tenant (Merchant) persistence (spec §3): the root of tenant-scoped data.
//! Admin-only operations — never exposed to tenant-scoped callers.

use chrono::Utc;
use rusqlite::params;

use super::models::Tenant;
use super::pool::Db;
use crate::error::AppError;

pub fn create(db: &Db, display_name: &str, config: &serde_json::Value) -> Result<Tenant, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    db.conn().execute(
        "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, ?2, 'active', ?3, ?4)",
        params![id, display_name, config.to_string(), now],
    )?;
    Ok(Tenant {
        id,
        display_name: display_name.to_string(),
        status: "active".into(),
        config: config.clone(),
        created_at: now,
    })
}

pub fn get(db: &Db, tenant_id: &str) -> Result<Tenant, AppError> {
    db.conn()
        .query_row(
            "SELECT id, display_name, status, config, created_at FROM tenants WHERE id = ?1",
            params![tenant_id],
            map_tenant,
        )
        .map_err(Into::into)
}

pub fn set_status(db: &Db, tenant_id: &str, status: &str) -> Result<(), AppError> {
    db.conn()
        .execute("UPDATE tenants SET status = ?1 WHERE id = ?2", params![status, tenant_id])?;
    Ok(())
}

fn map_tenant(r: &rusqlite::Row) -> rusqlite::Result<Tenant> {
    let config_str: String = r.get(3)?;
    Ok(Tenant {
        id: r.get(0)?,
        display_name: r.get(1)?,
        status: r.get(2)?,
        config: serde_json::from_str(&config_str).unwrap_or(serde_json::Value::Null),
        created_at: r.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    #[test]
    fn create_then_get_round_trips() {
        let db = test_db();
        let t = create(&db, "Acme", &serde_json::json!({"tone": "friendly"})).unwrap();
        let fetched = get(&db, &t.id).unwrap();
        assert_eq!(fetched.display_name, "Acme");
        assert_eq!(fetched.config["tone"], "friendly");
    }

    #[test]
    fn suspend_updates_status() {
        let db = test_db();
        let t = create(&db, "Acme", &serde_json::json!({})).unwrap();
        set_status(&db, &t.id, "suspended").unwrap();
        assert_eq!(get(&db, &t.id).unwrap().status, "suspended");
    }
}

//! C9 — Message-Window Tracker. `within_window(tenant, customer)` returns
//! true iff elapsed since `last_inbound_at` is within `window_hours` plus a
//! grace period for clock skew (spec §3, §4.9). Grounded on teacher's
//! `retention.rs` age-cutoff query style (`chrono::Duration` against a
//! stored timestamp column).

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use super::tenant::TenantScope;
use crate::error::AppError;

pub struct WindowTracker {
    pub window_hours: i64,
    pub grace_minutes: i64,
}

impl WindowTracker {
    pub fn new(window_hours: i64, grace_minutes: i64) -> Self {
        WindowTracker { window_hours, grace_minutes }
    }

    /// True iff `now - last_inbound_at <= window_hours + grace_minutes`.
    pub fn within_window(&self, scope: &TenantScope, customer_id: &str) -> Result<bool, AppError> {
        let conn = scope.conn();
        let last_inbound: Option<String> = conn
            .query_row(
                "SELECT last_inbound_at FROM window_state WHERE tenant_id = ?1 AND customer_id = ?2",
                params![scope.tenant_id(), customer_id],
                |r| r.get(0),
            )
            .ok();

        let Some(last_inbound) = last_inbound else {
            return Ok(false);
        };

        let last: DateTime<Utc> = last_inbound
            .parse()
            .map_err(|_| AppError::Internal("corrupt window_state timestamp".into()))?;

        let deadline = last + Duration::hours(self.window_hours) + Duration::minutes(self.grace_minutes);
        Ok(Utc::now() <= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::test_db;

    fn seed(tenant_id: &str, db: &crate::db::pool::Db) {
        db.conn()
            .execute(
                "INSERT INTO tenants (id, display_name, status, config, created_at) VALUES (?1, 'Acme', 'active', '{}', '2026-01-01T00:00:00Z')",
                params![tenant_id],
            )
            .unwrap();
    }

    fn set_last_inbound(scope: &TenantScope, customer_id: &str, at: DateTime<Utc>) {
        scope
            .conn()
            .execute(
                "INSERT INTO window_state (tenant_id, customer_id, last_inbound_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id, customer_id) DO UPDATE SET last_inbound_at = excluded.last_inbound_at",
                params![scope.tenant_id(), customer_id, at.to_rfc3339()],
            )
            .unwrap();
    }

    #[test]
    fn no_inbound_ever_is_outside_window() {
        let db = test_db();
        seed("t1", &db);
        let scope = TenantScope::new(db.conn(), "t1");
        let tracker = WindowTracker::new(24, 5);
        assert!(!tracker.within_window(&scope, "U1").unwrap());
    }

    #[test]
    fn just_under_24h_is_within_window() {
        let db = test_db();
        seed("t1", &db);
        let scope = TenantScope::new(db.conn(), "t1");
        let tracker = WindowTracker::new(24, 5);
        set_last_inbound(&scope, "U1", Utc::now() - Duration::hours(24) + Duration::seconds(1));
        assert!(tracker.within_window(&scope, "U1").unwrap());
    }

    #[test]
    fn past_grace_period_is_outside_window() {
        let db = test_db();
        seed("t1", &db);
        let scope = TenantScope::new(db.conn(), "t1");
        let tracker = WindowTracker::new(24, 5);
        set_last_inbound(&scope, "U1", Utc::now() - Duration::hours(24) - Duration::minutes(5) - Duration::seconds(1));
        assert!(!tracker.within_window(&scope, "U1").unwrap());
    }
}

//! Bounded per-process connection pool + schema migration.
//!
//! The teacher holds a single `Mutex<Connection>` (`db.rs`). Spec §5
//! requires a genuine bounded pool with per-checkout tenant-context binding,
//! which a single mutex cannot express, so this generalizes to
//! `r2d2`+`r2d2_sqlite` (see DESIGN.md) while keeping the teacher's actual
//! storage engine (SQLite) and its migration idiom (`CREATE TABLE IF NOT
//! EXISTS` + idempotent `ALTER TABLE ... ADD COLUMN` guarded with `.ok()`).

use r2d2_sqlite::SqliteConnectionManager;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Db {
    pool: Pool,
}

impl Db {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = r2d2::Pool::builder()
            .max_size(16)
            .build(manager)
            .expect("failed to build sqlite pool");
        let db = Db { pool };
        db.migrate();
        db
    }

    /// Checkout a pooled connection. Callers that need tenant isolation
    /// should go through `TenantScope` instead (`db::tenant`).
    pub fn conn(&self) -> PooledConn {
        self.pool.get().expect("pool exhausted or poisoned")
    }

    pub fn try_conn(&self) -> Result<PooledConn, r2d2::Error> {
        self.pool.get()
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                platform TEXT NOT NULL,
                platform_account_id TEXT NOT NULL,
                encrypted_token BLOB NOT NULL,
                refresh_metadata TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE(platform, platform_account_id)
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_tenant ON credentials(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_credentials_account ON credentials(platform, platform_account_id);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                customer_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'greeting',
                last_customer_message_at TEXT,
                last_outbound_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_open
                ON conversations(tenant_id, platform, customer_id)
                WHERE stage != 'resolved';
            CREATE INDEX IF NOT EXISTS idx_conversations_tenant ON conversations(tenant_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                tenant_id TEXT NOT NULL,
                platform TEXT NOT NULL DEFAULT '',
                direction TEXT NOT NULL,
                platform_message_id TEXT,
                content TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'text',
                ai_confidence REAL,
                ai_intent TEXT,
                processing_time_ms INTEGER,
                status TEXT NOT NULL DEFAULT 'received',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_platform_mid
                ON messages(platform, platform_message_id) WHERE platform_message_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_tenant ON messages(tenant_id);

            CREATE TABLE IF NOT EXISTS webhook_events (
                event_id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                received_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'received',
                raw_body_digest TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                priority_rank INTEGER NOT NULL DEFAULT 1,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                deadline_at TEXT,
                locked_until TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs(status, next_attempt_at, priority_rank);
            CREATE INDEX IF NOT EXISTS idx_jobs_tenant ON jobs(tenant_id, status);

            CREATE TABLE IF NOT EXISTS delivery_logs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                outcome TEXT NOT NULL,
                upstream_message_id TEXT,
                attempt_number INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                error_class TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_delivery_logs_conversation ON delivery_logs(conversation_id);

            CREATE TABLE IF NOT EXISTS dead_letters (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                last_error TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dead_letters_tenant ON dead_letters(tenant_id);

            CREATE TABLE IF NOT EXISTS window_state (
                tenant_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                last_inbound_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, customer_id)
            );

            CREATE TABLE IF NOT EXISTS outbound_candidates (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                content TEXT NOT NULL,
                intent TEXT,
                confidence REAL,
                status TEXT NOT NULL DEFAULT 'pending_delivery',
                idempotency_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_outbound_idempotency ON outbound_candidates(idempotency_key);

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                tenant_id TEXT,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                before_digest TEXT,
                after_digest TEXT,
                chain_digest TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )
        .expect("failed to run migrations");

        // messages predates the platform column; older databases need it
        // added and backfilled from their conversation before the unique
        // index can mean anything.
        conn.execute("ALTER TABLE messages ADD COLUMN platform TEXT NOT NULL DEFAULT ''", []).ok();
        conn.execute_batch(
            "UPDATE messages SET platform = (
                SELECT conversations.platform FROM conversations WHERE conversations.id = messages.conversation_id
             ) WHERE platform = '';",
        )
        .ok();

        // Open Question #1 resolution: legacy rows may carry inconsistent
        // platform casing; canonicalize to lowercase once.
        conn.execute_batch(
            "UPDATE conversations SET platform = LOWER(platform) WHERE platform != LOWER(platform);
             UPDATE credentials SET platform = LOWER(platform) WHERE platform != LOWER(platform);
             UPDATE webhook_events SET platform = LOWER(platform) WHERE platform != LOWER(platform);
             UPDATE messages SET platform = LOWER(platform) WHERE platform != LOWER(platform);",
        )
        .ok();
    }
}

#[cfg(test)]
pub fn test_db() -> Db {
    Db::new(&format!(
        "/tmp/dm_relay_test_{}.db",
        uuid::Uuid::new_v4().simple()
    ))
}

//! Explicit application context: every component's dependencies are
//! constructed once at startup and passed in here, replacing the teacher's
//! module-level singletons (spec §9 REDESIGN FLAGS — "implicit global
//! configuration").

use crate::ai::llm_client::LlmClient;
use crate::breaker::CircuitBreaker;
use crate::config::AppConfig;
use crate::crypto::aead::AeadKey;
use crate::db::{Db, TenantResolver};
use crate::kv::Kv;
use crate::queue::worker::ConversationLocks;
use crate::queue::JobQueue;
use crate::ratelimit::RateLimiter;

pub struct AppContext {
    pub db: Db,
    pub kv: Kv,
    pub config: AppConfig,
    pub queue: JobQueue,
    pub rate_limiter: RateLimiter,
    pub breaker: CircuitBreaker,
    pub llm: LlmClient,
    pub tenant_resolver: TenantResolver,
    pub encryption_key: AeadKey,
    pub conversation_locks: ConversationLocks,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self, crate::error::AppError> {
        let db = Db::new(&config.database_path);
        let kv = Kv::connect(config.kv_url.as_deref());
        let queue = JobQueue::new(
            db.clone(),
            config.per_tenant_concurrency,
            std::time::Duration::from_secs(60),
        );
        let rate_limiter = RateLimiter::new();
        let breaker = CircuitBreaker::new(config.circuit_fail_threshold, config.circuit_cooldown);
        let llm = LlmClient::new(&config);
        let tenant_resolver = TenantResolver::new();
        let encryption_key = AeadKey::from_hex(&config.encryption_key_hex)?;
        let conversation_locks = ConversationLocks::default();

        Ok(AppContext {
            db,
            kv,
            config,
            queue,
            rate_limiter,
            breaker,
            llm,
            tenant_resolver,
            encryption_key,
            conversation_locks,
        })
    }
}

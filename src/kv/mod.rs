//! Key-value abstraction for C2 (idempotency) and cross-worker shared
//! counters. Spec §1 treats the KV store as an external collaborator; this
//! module is the thin boundary plus a degraded in-process fallback for when
//! it's unreachable (spec §4.2), grounded on the teacher's `rate_limit.rs`
//! `Mutex<HashMap<..>>` shape for the fallback path.

pub mod idempotency;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Runtime};

use crate::error::AppError;

/// A Redis-compatible pool backed by an in-process fallback used whenever
/// that pool is unreachable — at startup (no pool ever built) or at call
/// time (spec §4.2: degradation is re-evaluated per call, not fixed at
/// construction). `degraded` reflects the live state for `/health`.
pub struct Kv {
    pool: Option<deadpool_redis::Pool>,
    fallback: Mutex<HashMap<String, Instant>>,
    degraded: AtomicBool,
}

impl Kv {
    pub fn connect(url: Option<&str>) -> Self {
        match url {
            Some(url) => match Config::from_url(url).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => Kv {
                    pool: Some(pool),
                    fallback: Mutex::new(HashMap::new()),
                    degraded: AtomicBool::new(false),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "kv store unreachable at startup, degrading to in-process fallback");
                    Kv {
                        pool: None,
                        fallback: Mutex::new(HashMap::new()),
                        degraded: AtomicBool::new(true),
                    }
                }
            },
            None => Kv {
                pool: None,
                fallback: Mutex::new(HashMap::new()),
                degraded: AtomicBool::new(true),
            },
        }
    }

    /// Atomic "set if not present, with TTL" — the primitive both `claim`
    /// and token-bucket persistence are built from. Returns `true` if this
    /// call established the key (i.e., it was not already present).
    ///
    /// Re-checks Redis reachability on every call: a connection or command
    /// failure degrades this single call to the in-process fallback rather
    /// than propagating as a hard error, and flips `degraded` live so
    /// `/health` reflects a Redis outage as it happens.
    pub async fn set_nx_ex(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        if let Some(pool) = &self.pool {
            match self.try_redis_set_nx_ex(pool, key, ttl).await {
                Ok(set) => {
                    self.degraded.store(false, Ordering::Relaxed);
                    return Ok(set);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "kv call failed, degrading to in-process fallback for this call");
                    self.degraded.store(true, Ordering::Relaxed);
                }
            }
        }
        Ok(self.fallback_set_nx_ex(key, ttl))
    }

    async fn try_redis_set_nx_ex(&self, pool: &deadpool_redis::Pool, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| AppError::UpstreamTransient(format!("kv pool: {e}")))?;
        let set: bool = conn
            .set_nx(key, "1")
            .await
            .map_err(|e| AppError::UpstreamTransient(format!("kv set_nx: {e}")))?;
        if set {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(|e| AppError::UpstreamTransient(format!("kv expire: {e}")))?;
        }
        Ok(set)
    }

    fn fallback_set_nx_ex(&self, key: &str, ttl: Duration) -> bool {
        let mut guard = self.fallback.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        guard.retain(|_, inserted_at| now.duration_since(*inserted_at) < ttl);
        if guard.contains_key(key) {
            false
        } else {
            guard.insert(key.to_string(), now);
            true
        }
    }

    /// Live degraded state: no pool was ever configured, or the most recent
    /// call fell back after a Redis failure.
    pub fn is_degraded(&self) -> bool {
        self.pool.is_none() || self.degraded.load(Ordering::Relaxed)
    }
}

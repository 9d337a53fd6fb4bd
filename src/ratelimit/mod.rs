//! C6 — Rate Limiter. Token bucket keyed by (tenant_id, upstream,
//! endpoint_class), with adaptive shrink on upstream usage telemetry (spec
//! §4.6). Grounded on the teacher's `rate_limit.rs`: same `Mutex<HashMap<String, _>>`
//! per-key state shape, generalized from a fixed sliding window to a token
//! bucket with refill and jitter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

/// One bucket's mutable state.
struct Bucket {
    tokens: f64,
    capacity: f64,
    base_capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
    /// Set by `report_usage` when an upstream signals >90% utilization;
    /// cleared once usage drops back below 75% (spec §4.6).
    throttled: bool,
}

impl Bucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Bucket {
            tokens: capacity,
            capacity,
            base_capacity: capacity,
            refill_per_second,
            last_refill: Instant::now(),
            throttled: false,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }
}

/// Outcome of an `acquire` call.
pub enum Acquire {
    Granted,
    Wait(Duration),
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter { buckets: Mutex::new(HashMap::new()) }
    }

    fn key(tenant_id: &str, upstream: &str, endpoint_class: &str) -> String {
        format!("{tenant_id}:{upstream}:{endpoint_class}")
    }

    /// Acquire `n` tokens for the given key, creating its bucket on first
    /// use with the given defaults.
    pub fn acquire(
        &self,
        tenant_id: &str,
        upstream: &str,
        endpoint_class: &str,
        n: f64,
        default_capacity: f64,
        default_refill_per_second: f64,
    ) -> Acquire {
        let key = Self::key(tenant_id, upstream, endpoint_class);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(default_capacity, default_refill_per_second));
        bucket.refill();

        if bucket.tokens >= n {
            bucket.tokens -= n;
            return Acquire::Granted;
        }

        let deficit = n - bucket.tokens;
        let mut wait_secs = deficit / bucket.refill_per_second.max(0.001);
        if bucket.throttled {
            wait_secs += wait_secs * rand::thread_rng().gen_range(0.0..0.1);
        }
        Acquire::Wait(Duration::from_secs_f64(wait_secs.max(0.0)))
    }

    /// Feed upstream usage telemetry (e.g. Graph API's `X-App-Usage`
    /// percentage). Above 90%, shrink effective capacity by half and start
    /// adding jitter; below 75%, restore baseline capacity (spec §4.6).
    pub fn report_usage(&self, tenant_id: &str, upstream: &str, endpoint_class: &str, usage_pct: f64) {
        let key = Self::key(tenant_id, upstream, endpoint_class);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(bucket) = buckets.get_mut(&key) else { return };

        if usage_pct > 90.0 {
            bucket.capacity = bucket.base_capacity * 0.5;
            bucket.tokens = bucket.tokens.min(bucket.capacity);
            bucket.throttled = true;
        } else if usage_pct < 75.0 && bucket.throttled {
            bucket.capacity = bucket.base_capacity;
            bucket.throttled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_within_capacity_then_waits() {
        let rl = RateLimiter::new();
        for _ in 0..5 {
            assert!(matches!(rl.acquire("t1", "graph", "send", 1.0, 5.0, 1.0), Acquire::Granted));
        }
        assert!(matches!(rl.acquire("t1", "graph", "send", 1.0, 5.0, 1.0), Acquire::Wait(_)));
    }

    #[test]
    fn usage_above_90_shrinks_capacity() {
        let rl = RateLimiter::new();
        // establish bucket
        rl.acquire("t1", "graph", "send", 0.0, 10.0, 1.0);
        rl.report_usage("t1", "graph", "send", 95.0);
        let buckets = rl.buckets.lock().unwrap();
        let bucket = buckets.get("t1:graph:send").unwrap();
        assert_eq!(bucket.capacity, 5.0);
        assert!(bucket.throttled);
    }

    #[test]
    fn usage_below_75_restores_baseline() {
        let rl = RateLimiter::new();
        rl.acquire("t1", "graph", "send", 0.0, 10.0, 1.0);
        rl.report_usage("t1", "graph", "send", 95.0);
        rl.report_usage("t1", "graph", "send", 60.0);
        let buckets = rl.buckets.lock().unwrap();
        let bucket = buckets.get("t1:graph:send").unwrap();
        assert_eq!(bucket.capacity, 10.0);
        assert!(!bucket.throttled);
    }
}

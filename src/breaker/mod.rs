//! C7 — Circuit Breaker. One breaker per upstream endpoint class:
//! Closed/Open/Half-Open state machine (spec §4.7). Grounded on the
//! teacher's `rate_limit.rs` per-key `Mutex<HashMap<..>>` registry shape,
//! generalized from counters to a state machine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: State,
    /// Ring of the last 20 outcomes (spec §4.7 rolling ratio), newest last.
    recent: Vec<bool>,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trip_count: u64,
}

const WINDOW: usize = 20;

impl Breaker {
    fn new(base_cooldown: Duration) -> Self {
        Breaker {
            state: State::Closed,
            recent: Vec::with_capacity(WINDOW),
            consecutive_failures: 0,
            opened_at: None,
            cooldown: base_cooldown,
            trip_count: 0,
        }
    }

    fn push_outcome(&mut self, success: bool) {
        self.recent.push(success);
        if self.recent.len() > WINDOW {
            self.recent.remove(0);
        }
    }

    fn failure_ratio(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|s| !**s).count();
        failures as f64 / self.recent.len() as f64
    }
}

/// Whether the caller may attempt the call right now.
pub enum Permit {
    Go,
    FailFast,
    /// Half-open probe: caller may attempt exactly one call; report the
    /// outcome via `record_result`.
    Probe,
}

pub struct CircuitBreaker {
    breakers: Mutex<HashMap<String, Breaker>>,
    fail_threshold: u32,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(fail_threshold: u32, base_cooldown: Duration) -> Self {
        CircuitBreaker {
            breakers: Mutex::new(HashMap::new()),
            fail_threshold,
            base_cooldown,
            max_cooldown: base_cooldown * 8,
        }
    }

    pub fn permit(&self, upstream: &str) -> Permit {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers
            .entry(upstream.to_string())
            .or_insert_with(|| Breaker::new(self.base_cooldown));

        match breaker.state {
            State::Closed => Permit::Go,
            State::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= breaker.cooldown {
                    breaker.state = State::HalfOpen;
                    Permit::Probe
                } else {
                    Permit::FailFast
                }
            }
            State::HalfOpen => Permit::FailFast, // a probe is already in flight
        }
    }

    /// Timeouts count as failures; non-retryable 4xx semantic rejections
    /// must NOT be reported here at all (spec §4.7).
    pub fn record_result(&self, upstream: &str, success: bool) {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers
            .entry(upstream.to_string())
            .or_insert_with(|| Breaker::new(self.base_cooldown));

        match breaker.state {
            State::HalfOpen => {
                if success {
                    breaker.state = State::Closed;
                    breaker.consecutive_failures = 0;
                    breaker.recent.clear();
                    breaker.cooldown = self.base_cooldown;
                } else {
                    breaker.state = State::Open;
                    breaker.opened_at = Some(Instant::now());
                    breaker.cooldown = (breaker.cooldown * 2).min(self.max_cooldown);
                    breaker.trip_count += 1;
                }
            }
            State::Closed => {
                breaker.push_outcome(success);
                if success {
                    breaker.consecutive_failures = 0;
                } else {
                    breaker.consecutive_failures += 1;
                }
                if breaker.consecutive_failures >= self.fail_threshold || breaker.failure_ratio() >= 0.5 {
                    breaker.state = State::Open;
                    breaker.opened_at = Some(Instant::now());
                    breaker.trip_count += 1;
                }
            }
            State::Open => {}
        }
    }

    pub fn state(&self, upstream: &str) -> State {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(upstream)
            .map(|b| b.state)
            .unwrap_or(State::Closed)
    }

    pub fn trip_count(&self, upstream: &str) -> u64 {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(upstream)
            .map(|b| b.trip_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_on_fifth_consecutive_failure_with_threshold_five() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..4 {
            assert!(matches!(cb.permit("graph"), Permit::Go));
            cb.record_result("graph", false);
        }
        assert_eq!(cb.state("graph"), State::Closed);
        assert!(matches!(cb.permit("graph"), Permit::Go));
        cb.record_result("graph", false);
        assert_eq!(cb.state("graph"), State::Open);
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_result("manychat", false);
        assert_eq!(cb.state("manychat"), State::Open);
        assert!(matches!(cb.permit("manychat"), Permit::Probe));
        cb.record_result("manychat", true);
        assert_eq!(cb.state("manychat"), State::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_doubles_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_result("manychat", false);
        assert!(matches!(cb.permit("manychat"), Permit::Probe));
        cb.record_result("manychat", false);
        assert_eq!(cb.state("manychat"), State::Open);
        assert_eq!(cb.trip_count("manychat"), 2);
    }
}

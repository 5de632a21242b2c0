//! CAS-based circuit breaker.
//!
//! `spec.md` §4.H: after `failure_threshold` consecutive failures the
//! breaker opens and rejects attempts until `cooldown` has elapsed, at
//! which point it allows exactly one trial attempt through. The breaker
//! never closes itself on the passage of time alone — `record_success`
//! is what closes it. A failed trial attempt while open simply restarts
//! the cooldown window.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::clock::Timestamp;
use crate::config::CircuitBreakerConfig;

const CLOSED: u32 = 0;
const OPEN: u32 = 1;

/// Lock-free circuit breaker state, safe to share as `Arc<CircuitBreaker>`
/// across the connectors racing to use it.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU32,
    failures: AtomicU32,
    opened_at_micros: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU32::new(CLOSED),
            failures: AtomicU32::new(0),
            opened_at_micros: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Whether a caller should attempt the protected operation right now.
    /// Closed: always. Open: only once `cooldown` has elapsed since it
    /// opened (a single trial attempt is let through; the breaker stays
    /// `Open` until that attempt calls `record_success`).
    pub fn should_attempt(&self, now: Timestamp) -> bool {
        match self.state.load(Ordering::Acquire) {
            CLOSED => true,
            _ => {
                let opened_at = self.opened_at_micros.load(Ordering::Acquire);
                let cooldown_micros = self.config.cooldown.as_micros() as u64;
                now.as_micros().saturating_sub(opened_at) >= cooldown_micros
            }
        }
    }

    /// Records a failed attempt. Opens the breaker once consecutive
    /// failures reach the configured threshold; if already open, restarts
    /// the cooldown window (a trial attempt that also failed). Returns
    /// `true` iff this call is the one that transitioned the breaker from
    /// `Closed` to `Open`.
    pub fn record_failure(&self, now: Timestamp) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.state.load(Ordering::Acquire) == OPEN {
            self.opened_at_micros.store(now.as_micros(), Ordering::Release);
            return false;
        }
        if failures >= self.config.failure_threshold {
            if self
                .state
                .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.opened_at_micros.store(now.as_micros(), Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Records a successful attempt: closes the breaker first, then resets
    /// the failure count. `spec.md` §4.H: close-before-reset ordering
    /// prevents a concurrent failure from reopening the breaker before the
    /// reset becomes visible to it.
    pub fn record_success(&self) {
        let _ = self.state.compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire);
        self.failures.store(0, Ordering::Release);
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: std::time::Duration::from_secs(1),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(cfg());
        let t0 = Timestamp::from_micros(0);
        assert!(breaker.should_attempt(t0));
        assert!(!breaker.record_failure(t0));
        assert!(!breaker.record_failure(t0));
        assert!(!breaker.is_open());
        assert!(breaker.record_failure(t0));
        assert!(breaker.is_open());
        assert!(!breaker.should_attempt(t0));
    }

    #[test]
    fn record_failure_only_reports_true_on_the_transition_that_opens_it() {
        let breaker = CircuitBreaker::new(cfg());
        let t0 = Timestamp::from_micros(0);
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert!(breaker.record_failure(t0));
        // The breaker is already open; further failures restart the
        // cooldown but don't report a fresh open transition.
        assert!(!breaker.record_failure(t0));
    }

    #[test]
    fn allows_trial_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(cfg());
        let t0 = Timestamp::from_micros(0);
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        assert!(breaker.is_open());
        let during_cooldown = Timestamp::from_micros(500_000);
        assert!(!breaker.should_attempt(during_cooldown));
        let after_cooldown = Timestamp::from_micros(1_000_001);
        assert!(breaker.should_attempt(after_cooldown));
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn does_not_auto_close_merely_because_cooldown_passed() {
        let breaker = CircuitBreaker::new(cfg());
        let t0 = Timestamp::from_micros(0);
        for _ in 0..3 {
            breaker.record_failure(t0);
        }
        let later = Timestamp::from_micros(10_000_000);
        assert!(breaker.should_attempt(later));
        assert!(breaker.is_open());
    }
}

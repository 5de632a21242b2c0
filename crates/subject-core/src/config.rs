//! Construction-time configuration, validated eagerly so a misconfigured
//! system never partially starts (`spec.md` §7, `ConfigurationFailure`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubjectError};

/// Parameters for [`crate::runtime::circuit_breaker::CircuitBreaker`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Parameters for [`crate::runtime::backoff::ExponentialBackoff`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter_ratio: 0.05,
        }
    }
}

/// Connector timeouts, per `spec.md` §5 ("connect, receive, ping and
/// dispose each have their own timeout with sensible defaults").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect: Duration,
    pub receive: Duration,
    pub ping: Duration,
    pub dispose: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            receive: Duration::from_secs(30),
            ping: Duration::from_secs(10),
            dispose: Duration::from_secs(2),
        }
    }
}

/// Top-level runtime configuration for a [`crate::context::Context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub backoff: BackoffConfig,
    pub timeouts: TimeoutConfig,
    /// Default `WriteBatchSize` applied to a source that doesn't declare one.
    pub default_write_batch_size: usize,
    /// TTL for `was_recently_deleted` in the connector subject registry.
    pub recently_deleted_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            timeouts: TimeoutConfig::default(),
            default_write_batch_size: 64,
            recently_deleted_ttl: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Validates the configuration, rejecting it before any component
    /// starts. Mirrors `spec.md` §7 `ConfigurationFailure`: "Fails fast; no
    /// partial system ever starts."
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(SubjectError::configuration_failure(
                "circuit_breaker.failure_threshold must be >= 1",
            ));
        }
        if self.circuit_breaker.cooldown.is_zero() {
            return Err(SubjectError::configuration_failure(
                "circuit_breaker.cooldown must be positive",
            ));
        }
        if self.backoff.initial_delay.is_zero() {
            return Err(SubjectError::configuration_failure(
                "backoff.initial_delay must be positive",
            ));
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(SubjectError::configuration_failure(
                "backoff.max_delay must be >= backoff.initial_delay",
            ));
        }
        if self.backoff.factor <= 1.0 {
            return Err(SubjectError::configuration_failure(
                "backoff.factor must be > 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_ratio) {
            return Err(SubjectError::configuration_failure(
                "backoff.jitter_ratio must be within [0.0, 1.0]",
            ));
        }
        if self.default_write_batch_size == 0 {
            return Err(SubjectError::configuration_failure(
                "default_write_batch_size must be >= 1",
            ));
        }
        for (name, timeout) in [
            ("connect", self.timeouts.connect),
            ("receive", self.timeouts.receive),
            ("ping", self.timeouts.ping),
            ("dispose", self.timeouts.dispose),
        ] {
            if timeout.is_zero() {
                return Err(SubjectError::configuration_failure(format!(
                    "timeouts.{name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

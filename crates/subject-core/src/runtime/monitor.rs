//! Connection monitor loop: periodic ping, reconnect on failure, gated by a
//! circuit breaker and paced by exponential backoff.
//!
//! `spec.md` §5: "a connector's liveness loop pings on an interval; a failed
//! ping schedules a reconnect attempt only if the circuit breaker currently
//! allows it, backing off between attempts." This module is deliberately
//! generic over what "ping"/"reconnect" mean — the concrete OPC UA/MQTT/
//! WebSocket/HTTP implementations are out of scope; connectors plug in by
//! implementing [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::error::Result;
use crate::observability::{Field, Logger};
use crate::runtime::backoff::ExponentialBackoff;
use crate::runtime::circuit_breaker::CircuitBreaker;

/// What a connector exposes to the monitor loop.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn reconnect(&self) -> Result<()>;
}

/// Drives a [`Connection`]'s liveness loop until told to stop.
pub struct Monitor<C: Connection> {
    connection: Arc<C>,
    breaker: Arc<CircuitBreaker>,
    backoff: ExponentialBackoff,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    ping_interval: Duration,
}

impl<C: Connection> Monitor<C> {
    pub fn new(
        connection: Arc<C>,
        breaker: Arc<CircuitBreaker>,
        backoff: ExponentialBackoff,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            connection,
            breaker,
            backoff,
            clock,
            logger,
            ping_interval,
        }
    }

    /// Runs until `shutdown` reports `true`. Each iteration: sleep for the
    /// ping interval, then ping if the breaker allows it; on ping failure,
    /// back off and attempt a reconnect, again only if the breaker allows
    /// it at that point.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = self.clock.sleep(self.ping_interval) => {
                    self.tick(&mut attempt).await;
                }
            }
        }
    }

    async fn tick(&self, attempt: &mut u32) {
        let now = self.clock.now_utc();
        if !self.breaker.should_attempt(now) {
            return;
        }
        match self.connection.ping().await {
            Ok(()) => {
                self.breaker.record_success();
                *attempt = 0;
            }
            Err(err) => {
                self.breaker.record_failure(self.clock.now_utc());
                self.logger.warn(
                    "connector.ping_failed",
                    &[Field::new("error", err.to_string())],
                );
                let delay = self.backoff.delay_for_attempt(*attempt);
                *attempt = attempt.saturating_add(1);
                self.clock.sleep(delay).await;

                if self.breaker.should_attempt(self.clock.now_utc()) {
                    match self.connection.reconnect().await {
                        Ok(()) => {
                            self.breaker.record_success();
                            *attempt = 0;
                        }
                        Err(err) => {
                            self.breaker.record_failure(self.clock.now_utc());
                            self.logger.error(
                                "connector.reconnect_failed",
                                &[Field::new("error", err.to_string())],
                            );
                        }
                    }
                }
            }
        }
    }
}

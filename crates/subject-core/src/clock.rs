//! Injectable clock, grounded on the teacher's `time::clock::Clock` seam.
//!
//! `spec.md` §6 lists `Clock.now_utc() -> Timestamp` as a capability the
//! core consumes, "pluggable for tests." We additionally expose `sleep` so
//! the circuit breaker / backoff / read-after-write scheduler tests (§8
//! tests 7, 8, 10) can run against a [`MockClock`] with no real delay.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Microseconds since the Unix epoch. Monotonic only with respect to a
/// single `Clock` implementation; `changed_at_utc` / `received_at_utc` in
/// [`crate::change::ChangeRecord`] are stamped from this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }
}

/// Abstract time source used everywhere a real wall clock would otherwise
/// be called directly, so tests can inject deterministic time.
pub trait Clock: Send + Sync + 'static {
    fn now_utc(&self) -> Timestamp;
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Real wall-clock time, backed by `tokio::time::sleep` so it composes with
/// the async runtime used by connectors and the monitor loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Timestamp(micros)
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests: `now_utc` advances only when told to, and
/// `sleep` resolves as soon as the virtual time reaches its deadline.
pub struct MockClock {
    micros: Arc<AtomicU64>,
    notify: Arc<tokio::sync::Notify>,
}

impl MockClock {
    pub fn new(start_micros: u64) -> Arc<Self> {
        Arc::new(Self {
            micros: Arc::new(AtomicU64::new(start_micros)),
            notify: Arc::new(tokio::sync::Notify::new()),
        })
    }

    pub fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let deadline = self.micros.load(Ordering::SeqCst) + duration.as_micros() as u64;
        let micros = self.micros.clone();
        let notify = self.notify.clone();
        Box::pin(async move {
            loop {
                if micros.load(Ordering::SeqCst) >= deadline {
                    return;
                }
                notify.notified().await;
            }
        })
    }
}

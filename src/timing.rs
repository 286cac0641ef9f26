//! Bounded polling policy and an injectable clock.
//!
//! Hardware waits in this crate (stage motion polling, the spectrometer's
//! post-exposure settle guard) never call `tokio::time::sleep` directly. They
//! go through a [`Clock`] so tests can substitute [`ManualClock`] and simulate
//! instantaneous or slow devices without real time passing.
//!
//! # Example
//!
//! ```rust
//! use frog_daq::timing::PollPolicy;
//! use std::time::Duration;
//!
//! let policy = PollPolicy::default();
//! assert_eq!(policy.max_attempts, 120);
//! assert_eq!(policy.interval, Duration::from_millis(100));
//! assert_eq!(policy.budget(), Duration::from_secs(12));
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Defines how often and how many times a condition is polled.
///
/// Uses a constant interval. The total wait is bounded by
/// `interval * max_attempts`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two consecutive polls.
    pub interval: Duration,
    /// Number of polls before giving up.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// 120 polls at 100 ms, roughly 12 seconds.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 120,
        }
    }
}

impl PollPolicy {
    /// Create a policy with an explicit interval and attempt count.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound of time spent sleeping between polls.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Source of time for hardware waits.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant on this clock.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration` on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests.
///
/// `sleep` advances the clock by the requested amount and returns after a
/// single yield, so a 12 second poll budget elapses instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock whose virtual time starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: AtomicU64::new(0),
        }
    }

    /// Advance virtual time without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `sleep` calls served so far.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

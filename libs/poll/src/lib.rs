//! Polling primitives.
//!
//! Every wait in an idlefleet session is a sleep-then-recheck loop against
//! some external system (task status, server reachability, player count).
//! This library provides the pieces those loops are built from:
//!
//! - **Sleeper**: the only place time passes. Injected so tests can run
//!   thousands of polling cycles without real delay.
//! - **Backoff**: how long to wait before the next check.
//! - **Pacer**: a per-loop attempt counter that applies a backoff through a sleeper.
//!
//! # Invariants
//!
//! - A loop never sleeps through a `Sleeper` it did not receive explicitly
//! - Delays are deterministic given the attempt number
//! - Exponential delays never exceed their configured cap

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

/// Default interval between task status checks.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval between occupancy observations.
pub const DEFAULT_OCCUPANCY_INTERVAL: Duration = Duration::from_secs(10);

/// Suspends the current loop for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that records each requested duration and returns immediately.
///
/// It still yields to the scheduler so loops driven by it stay cooperative.
#[derive(Debug, Default)]
pub struct ManualSleeper {
    requests: Mutex<Vec<Duration>>,
}

impl ManualSleeper {
    /// Create a new manual sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// All durations requested so far, in order.
    pub fn requests(&self) -> Vec<Duration> {
        self.lock().clone()
    }

    /// Number of sleeps requested so far.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Sum of all requested durations (the simulated elapsed time).
    pub fn elapsed(&self) -> Duration {
        self.lock().iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sleeper for ManualSleeper {
    async fn sleep(&self, duration: Duration) {
        self.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Delay policy between consecutive checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every check.
    Fixed(Duration),

    /// Delay doubles after every check, starting at `initial` and capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to apply after `pauses` previous pauses.
    pub fn delay(&self, pauses: u32) -> Duration {
        match *self {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32 << pauses.min(31);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Paces a single polling loop.
///
/// A loop calls [`Pacer::pause`] after every check that did not reach its
/// exit condition. The pacer counts pauses so backoff can grow, and
/// [`Pacer::reset`] restarts the schedule.
pub struct Pacer {
    sleeper: Arc<dyn Sleeper>,
    backoff: Backoff,
    pauses: u32,
}

impl Pacer {
    /// Create a pacer for one loop.
    pub fn new(sleeper: Arc<dyn Sleeper>, backoff: Backoff) -> Self {
        Self {
            sleeper,
            backoff,
            pauses: 0,
        }
    }

    /// Convenience constructor for a fixed-interval loop.
    pub fn fixed(sleeper: Arc<dyn Sleeper>, interval: Duration) -> Self {
        Self::new(sleeper, Backoff::Fixed(interval))
    }

    /// Number of pauses taken since creation or the last reset.
    pub fn pauses(&self) -> u32 {
        self.pauses
    }

    /// The delay the next pause will use.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay(self.pauses)
    }

    /// Sleep for the next delay in the schedule.
    pub async fn pause(&mut self) {
        let delay = self.next_delay();
        self.pauses = self.pauses.saturating_add(1);
        self.sleeper.sleep(delay).await;
    }

    /// Restart the backoff schedule.
    pub fn reset(&mut self) {
        self.pauses = 0;
    }
}

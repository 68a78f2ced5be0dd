//! Occupancy watchdog.
//!
//! Polls the live player count on a fixed interval and declares the session
//! idle once the count has been zero for more than `threshold` consecutive
//! observations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use idlefleet_poll::{Pacer, Sleeper};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::probe::{GameStatus, ServerEndpoint};

/// How an observation whose status query failed transiently is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeFailurePolicy {
    /// Leave the idle streak unchanged.
    Skip,
    /// Count the tick as empty.
    Idle,
    /// Count the tick as occupied, resetting the streak.
    Occupied,
}

/// One successful occupancy reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyObservation {
    pub at: DateTime<Utc>,
    pub count: u32,
}

/// Consecutive-empty-observation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleStreak {
    threshold: u32,
    ticks: u32,
}

impl IdleStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            ticks: 0,
        }
    }

    /// Record a player count. Returns true once the streak exceeds the threshold.
    pub fn observe(&mut self, count: u32) -> bool {
        if count == 0 {
            self.record_empty()
        } else {
            self.record_occupied()
        }
    }

    pub fn record_empty(&mut self) -> bool {
        self.ticks = self.ticks.saturating_add(1);
        self.is_idle()
    }

    pub fn record_occupied(&mut self) -> bool {
        self.ticks = 0;
        self.is_idle()
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn is_idle(&self) -> bool {
        self.ticks > self.threshold
    }
}

/// What a finished watch saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    /// Status queries issued, including failed ones.
    pub ticks: u32,
    /// Queries that failed transiently.
    pub failed_probes: u32,
    /// Last successful reading.
    pub last: Option<OccupancyObservation>,
}

/// Watches occupancy until the server has been empty long enough.
pub struct OccupancyWatchdog {
    status: Arc<dyn GameStatus>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    threshold: u32,
    policy: ProbeFailurePolicy,
}

impl OccupancyWatchdog {
    pub fn new(
        status: Arc<dyn GameStatus>,
        sleeper: Arc<dyn Sleeper>,
        interval: Duration,
        threshold: u32,
        policy: ProbeFailurePolicy,
    ) -> Self {
        Self {
            status,
            sleeper,
            interval,
            threshold,
            policy,
        }
    }

    /// Block until the session is idle.
    ///
    /// Sleeps one interval after every observation, the final one included.
    /// Non-transient probe failures end the watch with an error.
    pub async fn watch(&self, endpoint: &ServerEndpoint) -> Result<WatchSummary> {
        info!(
            endpoint = %endpoint,
            threshold = self.threshold,
            interval_secs = self.interval.as_secs(),
            policy = ?self.policy,
            "Watching occupancy"
        );

        let mut streak = IdleStreak::new(self.threshold);
        let mut pacer = Pacer::fixed(self.sleeper.clone(), self.interval);
        let mut summary = WatchSummary {
            ticks: 0,
            failed_probes: 0,
            last: None,
        };

        loop {
            summary.ticks += 1;
            match self.status.query(endpoint).await {
                Ok(snapshot) => {
                    streak.observe(snapshot.online);
                    debug!(
                        player_count = snapshot.online,
                        idle_ticks = streak.ticks(),
                        "Occupancy observed"
                    );
                    summary.last = Some(OccupancyObservation {
                        at: Utc::now(),
                        count: snapshot.online,
                    });
                }
                Err(e) if e.is_transient() => {
                    summary.failed_probes += 1;
                    match self.policy {
                        ProbeFailurePolicy::Skip => {}
                        ProbeFailurePolicy::Idle => {
                            streak.record_empty();
                        }
                        ProbeFailurePolicy::Occupied => {
                            streak.record_occupied();
                        }
                    }
                    warn!(
                        error = %e,
                        policy = ?self.policy,
                        idle_ticks = streak.ticks(),
                        "Occupancy query failed"
                    );
                }
                Err(e) => return Err(Error::Probe(e)),
            }

            pacer.pause().await;

            if streak.is_idle() {
                info!(
                    idle_ticks = streak.ticks(),
                    threshold = self.threshold,
                    ticks = summary.ticks,
                    "Server idle, ending session"
                );
                return Ok(summary);
            }
        }
    }
}

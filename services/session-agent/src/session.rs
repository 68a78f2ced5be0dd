//! Session orchestrator.
//!
//! Drives one game-server session through its lifecycle. Each phase names
//! the work performed while the session is in it; finishing that work moves
//! the session to the next phase. Any error moves it to `Failed` from
//! wherever it was, with no compensation.
//!
//! ## State Machine
//!
//! ```text
//! RESOLVING_FLEET -> DNS_UP -> RESTORING -> LAUNCHING_SERVER -> AWAITING_READY
//!     -> WATCHING_OCCUPANCY -> STOPPING_SERVER -> PERSISTING -> DNS_DOWN -> SCALED_DOWN
//!
//! any non-terminal phase ----error----> FAILED
//! ```
//!
//! Teardown of the DNS record in `DNS_DOWN` is best effort: a failed delete
//! is logged and the fleet is still scaled to zero.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use idlefleet_poll::{Backoff, Sleeper};
use tracing::{error, info, warn};

use crate::capacity::{CapacityController, CapacityResolver};
use crate::cloud::{ComputeApi, DnsApi, FleetApi, FleetId};
use crate::config::Config;
use crate::dns::{DnsLease, NetworkPublisher};
use crate::error::{Error, Result};
use crate::probe::{GameStatus, ReadinessProber, ServerEndpoint};
use crate::tasks::{TaskHandle, TaskRunner};
use crate::watchdog::OccupancyWatchdog;

/// Reason attached to the stop request for the server task.
pub const IDLE_STOP_REASON: &str = "idlefleet: no players online";

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ResolvingFleet,
    DnsUp,
    Restoring,
    LaunchingServer,
    AwaitingReady,
    WatchingOccupancy,
    StoppingServer,
    Persisting,
    DnsDown,
    ScaledDown,
    Failed,
}

impl Phase {
    /// Phase entered when this phase's work succeeds.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::ResolvingFleet => Some(Phase::DnsUp),
            Phase::DnsUp => Some(Phase::Restoring),
            Phase::Restoring => Some(Phase::LaunchingServer),
            Phase::LaunchingServer => Some(Phase::AwaitingReady),
            Phase::AwaitingReady => Some(Phase::WatchingOccupancy),
            Phase::WatchingOccupancy => Some(Phase::StoppingServer),
            Phase::StoppingServer => Some(Phase::Persisting),
            Phase::Persisting => Some(Phase::DnsDown),
            Phase::DnsDown => Some(Phase::ScaledDown),
            Phase::ScaledDown | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::ScaledDown | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::ResolvingFleet => "RESOLVING_FLEET",
            Phase::DnsUp => "DNS_UP",
            Phase::Restoring => "RESTORING",
            Phase::LaunchingServer => "LAUNCHING_SERVER",
            Phase::AwaitingReady => "AWAITING_READY",
            Phase::WatchingOccupancy => "WATCHING_OCCUPANCY",
            Phase::StoppingServer => "STOPPING_SERVER",
            Phase::Persisting => "PERSISTING",
            Phase::DnsDown => "DNS_DOWN",
            Phase::ScaledDown => "SCALED_DOWN",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// In-memory state of the session.
#[derive(Debug, Clone)]
pub struct Session {
    pub fleet_id: Option<FleetId>,
    pub record_name: String,
    pub zone_id: String,
    pub phase: Phase,
    /// Phase whose work failed, once the session is `Failed`.
    pub failed_in: Option<Phase>,
    pub restore: Option<TaskHandle>,
    pub server: Option<TaskHandle>,
    pub persist: Option<TaskHandle>,
    pub lease: Option<DnsLease>,
    pub history: Vec<Transition>,
}

impl Session {
    fn new(record_name: String, zone_id: String) -> Self {
        Self {
            fleet_id: None,
            record_name,
            zone_id,
            phase: Phase::ResolvingFleet,
            failed_in: None,
            restore: None,
            server: None,
            persist: None,
            lease: None,
            history: Vec::new(),
        }
    }
}

/// External systems a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub compute: Arc<dyn ComputeApi>,
    pub fleet: Arc<dyn FleetApi>,
    pub dns: Arc<dyn DnsApi>,
    pub status: Arc<dyn GameStatus>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Sequences the lifecycle of one session.
pub struct SessionOrchestrator {
    session: Session,
    resolver: Arc<CapacityResolver>,
    publisher: NetworkPublisher,
    runner: TaskRunner,
    prober: ReadinessProber,
    watchdog: OccupancyWatchdog,
    capacity: CapacityController,
    endpoint: ServerEndpoint,
    restore_task: String,
    server_task: String,
    persist_task: String,
    fleet_override: Option<FleetId>,
    await_drain: bool,
}

impl SessionOrchestrator {
    /// Wire every component from the config and collaborators.
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            compute,
            fleet,
            dns,
            status,
            sleeper,
        } = collaborators;

        let resolver = Arc::new(CapacityResolver::new(compute.clone()));
        let publisher = NetworkPublisher::new(
            dns,
            resolver.clone(),
            config.record_name.clone(),
            config.hosted_zone_id.clone(),
            config.dns_ttl,
        );
        let runner = TaskRunner::new(compute.clone(), sleeper.clone(), config.task_poll_interval());
        let prober = ReadinessProber::new(
            status.clone(),
            sleeper.clone(),
            Backoff::Exponential {
                initial: config.task_poll_interval(),
                max: config.ready_backoff_max(),
            },
        );
        let watchdog = OccupancyWatchdog::new(
            status,
            sleeper.clone(),
            config.occupancy_interval(),
            config.idle_threshold,
            config.on_probe_failure,
        );
        let capacity = CapacityController::new(fleet, compute, sleeper, config.occupancy_interval());

        Self {
            session: Session::new(config.record_name.clone(), config.hosted_zone_id.clone()),
            resolver,
            publisher,
            runner,
            prober,
            watchdog,
            capacity,
            endpoint: config.probe_endpoint(),
            restore_task: config.restore_task.clone(),
            server_task: config.server_task.clone(),
            persist_task: config.persist_task.clone(),
            fleet_override: config.fleet_name.clone().map(FleetId::new),
            await_drain: config.await_drain,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    /// Run every remaining phase until the session reaches a terminal phase.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            record = %self.session.record_name,
            endpoint = %self.endpoint,
            "Starting session"
        );
        while !self.session.phase.is_terminal() {
            self.step().await?;
        }
        info!(transitions = self.session.history.len(), "Session complete");
        Ok(())
    }

    /// Perform the current phase's work and move to the next phase.
    ///
    /// Returns the phase entered. Calling this in a terminal phase is a no-op.
    pub async fn step(&mut self) -> Result<Phase> {
        let from = self.session.phase;
        let Some(to) = from.next() else {
            return Ok(from);
        };

        match self.perform(from).await {
            Ok(()) => {
                self.transition(to);
                Ok(to)
            }
            Err(e) => {
                error!(phase = %from, error = %e, "Session failed");
                self.session.failed_in = Some(from);
                self.transition(Phase::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, to: Phase) {
        let from = self.session.phase;
        info!(from = %from, to = %to, "Phase transition");
        self.session.history.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.session.phase = to;
    }

    async fn perform(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::ResolvingFleet => {
                let fleet = match &self.fleet_override {
                    Some(fleet) => {
                        info!(fleet_id = %fleet, "Using configured fleet");
                        fleet.clone()
                    }
                    None => self.resolver.resolve_fleet_id().await?,
                };
                self.session.fleet_id = Some(fleet);
            }
            Phase::DnsUp => {
                let fleet = self.fleet()?;
                self.session.lease = Some(self.publisher.publish(&fleet).await?);
            }
            Phase::Restoring => {
                let handle = self.runner.launch(&self.restore_task).await?;
                let handle = self.session.restore.insert(handle);
                self.runner.await_terminal(handle).await?;
            }
            Phase::LaunchingServer => {
                self.session.server = Some(self.runner.launch(&self.server_task).await?);
            }
            Phase::AwaitingReady => {
                self.prober.wait_until_ready(&self.endpoint).await?;
            }
            Phase::WatchingOccupancy => {
                self.watchdog.watch(&self.endpoint).await?;
            }
            Phase::StoppingServer => {
                let Some(handle) = self.session.server.as_mut() else {
                    return Err(Error::task(&self.server_task, "server task was never launched"));
                };
                self.runner.stop(handle, IDLE_STOP_REASON).await?;
                self.runner.await_terminal(handle).await?;
            }
            Phase::Persisting => {
                let handle = self.runner.launch(&self.persist_task).await?;
                let handle = self.session.persist.insert(handle);
                self.runner.await_terminal(handle).await?;
            }
            Phase::DnsDown => {
                self.teardown_dns().await;
                let fleet = self.fleet()?;
                self.capacity.scale_to(&fleet, 0).await?;
                if self.await_drain {
                    self.capacity.await_registered(0).await?;
                }
            }
            Phase::ScaledDown | Phase::Failed => {}
        }
        Ok(())
    }

    async fn teardown_dns(&mut self) {
        let Some(lease) = self.session.lease.take() else {
            warn!("No DNS record was published, nothing to remove");
            return;
        };
        if let Err(e) = self.publisher.unpublish(&lease).await {
            warn!(
                record = %lease.record().name,
                address = %lease.address(),
                error = %e,
                "Failed to remove DNS record, continuing teardown"
            );
            self.session.lease = Some(lease);
        }
    }

    fn fleet(&self) -> Result<FleetId> {
        self.session
            .fleet_id
            .clone()
            .ok_or_else(|| Error::Resolution("fleet has not been resolved".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::mock::{fleet_instance, MockCompute, MockDns, MockFleet, MockGameStatus};
    use idlefleet_poll::ManualSleeper;
    use std::net::Ipv4Addr;

    #[test]
    fn test_phase_chain_ends_scaled_down() {
        let mut phase = Phase::ResolvingFleet;
        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            visited.push(next);
            phase = next;
        }

        assert_eq!(visited.len(), 10);
        assert_eq!(phase, Phase::ScaledDown);
        assert!(!visited.contains(&Phase::Failed));
        assert!(Phase::Failed.next().is_none());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::WatchingOccupancy.to_string(), "WATCHING_OCCUPANCY");
        assert_eq!(Phase::ScaledDown.to_string(), "SCALED_DOWN");
    }

    #[tokio::test]
    async fn test_step_in_terminal_phase_is_noop() {
        let compute = Arc::new(MockCompute::new());
        let collaborators = Collaborators {
            compute: compute.clone(),
            fleet: Arc::new(MockFleet::new()),
            dns: Arc::new(MockDns::new()),
            status: Arc::new(MockGameStatus::new()),
            sleeper: Arc::new(ManualSleeper::new()),
        };
        let mut orchestrator = SessionOrchestrator::new(&test_config(), collaborators);

        // No registered instances: resolution fails.
        assert!(orchestrator.step().await.is_err());
        assert_eq!(orchestrator.phase(), Phase::Failed);
        assert_eq!(orchestrator.session().failed_in, Some(Phase::ResolvingFleet));

        let calls_before = compute.calls().len();
        assert_eq!(orchestrator.step().await.unwrap(), Phase::Failed);
        assert_eq!(compute.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_steps_through_dns_up() {
        let compute = Arc::new(MockCompute::new().with_instance(
            "ci-1",
            fleet_instance("i-0abc", "mc-asg", Some(Ipv4Addr::new(10, 0, 0, 5))),
        ));
        let dns = Arc::new(MockDns::new());
        let collaborators = Collaborators {
            compute,
            fleet: Arc::new(MockFleet::new()),
            dns: dns.clone(),
            status: Arc::new(MockGameStatus::new()),
            sleeper: Arc::new(ManualSleeper::new()),
        };
        let mut orchestrator = SessionOrchestrator::new(&test_config(), collaborators);

        assert_eq!(orchestrator.step().await.unwrap(), Phase::DnsUp);
        assert_eq!(
            orchestrator.session().fleet_id,
            Some(FleetId::new("mc-asg"))
        );
        assert!(dns.records().is_empty());

        assert_eq!(orchestrator.step().await.unwrap(), Phase::Restoring);
        assert_eq!(dns.records().len(), 1);
        let lease = orchestrator.session().lease.clone().unwrap();
        assert_eq!(lease.address(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(orchestrator.session().history.len(), 2);
    }
}

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use idlefleet_agent::cloud::TaskStatus;
use idlefleet_agent::mock::{fleet_instance, MockCompute, MockDns, MockFleet, MockGameStatus};
use idlefleet_agent::probe::ProbeError;
use idlefleet_agent::{Collaborators, Config, SessionOrchestrator};
use idlefleet_poll::ManualSleeper;

pub const FLEET: &str = "mc-asg";
pub const ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

/// Parse a config from the required flags plus `extra`. Environment
/// variables are ignored so the defaults are the built-in ones.
pub fn config(extra: &[&str]) -> Config {
    let mut args = vec![
        "idlefleet",
        "--record-name",
        "mc.example.com",
        "--hosted-zone-id",
        "Z0123456789",
        "--cluster",
        "ecs-minecraft",
    ];
    args.extend_from_slice(extra);
    Config::try_parse_args_only(args).unwrap()
}

/// A cluster with one registered instance in `mc-asg` at 10.0.0.5, where
/// restore and persist jobs finish after a few polls.
pub fn healthy_compute() -> MockCompute {
    MockCompute::new()
        .with_instance("ci-1", fleet_instance("i-0abc", FLEET, Some(ADDRESS)))
        .with_task_script(
            "s3-pull",
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Stopped],
        )
        .with_task_script("s3-push", vec![TaskStatus::Running, TaskStatus::Stopped])
}

/// A game server that refuses two connects, then reports `counts` players.
/// The first count is consumed by the readiness probe.
pub fn game(counts: Vec<u32>) -> MockGameStatus {
    MockGameStatus::new()
        .with_connect_results(vec![
            Err(ProbeError::Unreachable("connection refused".into())),
            Err(ProbeError::Unreachable("connection refused".into())),
        ])
        .with_occupancy(counts)
}

pub struct Harness {
    pub compute: Arc<MockCompute>,
    pub fleet: Arc<MockFleet>,
    pub dns: Arc<MockDns>,
    pub status: Arc<MockGameStatus>,
    pub sleeper: Arc<ManualSleeper>,
}

impl Harness {
    pub fn new(compute: MockCompute, status: MockGameStatus) -> Self {
        Self {
            compute: Arc::new(compute),
            fleet: Arc::new(MockFleet::new()),
            dns: Arc::new(MockDns::new()),
            status: Arc::new(status),
            sleeper: Arc::new(ManualSleeper::new()),
        }
    }

    pub fn with_fleet(mut self, fleet: MockFleet) -> Self {
        self.fleet = Arc::new(fleet);
        self
    }

    pub fn with_dns(mut self, dns: MockDns) -> Self {
        self.dns = Arc::new(dns);
        self
    }

    pub fn orchestrator(&self, config: &Config) -> SessionOrchestrator {
        SessionOrchestrator::new(
            config,
            Collaborators {
                compute: self.compute.clone(),
                fleet: self.fleet.clone(),
                dns: self.dns.clone(),
                status: self.status.clone(),
                sleeper: self.sleeper.clone(),
            },
        )
    }
}

//! Configuration for the session agent.
//!
//! Every setting can be given as a flag or as an environment variable. The
//! config is parsed once at startup and handed to each component constructor.

use std::time::Duration;

use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use idlefleet_poll::{DEFAULT_OCCUPANCY_INTERVAL, DEFAULT_TASK_POLL_INTERVAL};
use thiserror::Error;

use crate::probe::ServerEndpoint;
use crate::watchdog::ProbeFailurePolicy;

/// Default game server port.
pub const DEFAULT_SERVER_PORT: u16 = 25565;

/// Configuration errors detected before any external call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be at most {max}")]
    TooLarge { name: &'static str, max: u64 },
}

/// Largest accepted idle threshold. The idle streak must be able to exceed it.
pub const MAX_IDLE_THRESHOLD: u32 = u32::MAX - 1;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Session agent configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "idlefleet")]
#[command(version, about = "Run one on-demand game server session, then scale the fleet to zero")]
pub struct Config {
    /// DNS record published for players while the session runs.
    #[arg(long, env = "R53_RECORD_SET_NAME")]
    pub record_name: String,

    /// Hosted zone containing the record.
    #[arg(long, env = "R53_HOSTED_ZONE_ID")]
    pub hosted_zone_id: String,

    /// Compute cluster running the restore, server, and persist tasks.
    #[arg(long, env = "ECS_CLUSTER_NAME")]
    pub cluster: String,

    /// Fleet (auto-scaling group) name. Discovered from the cluster when omitted.
    #[arg(long, env = "ASG_NAME")]
    pub fleet_name: Option<String>,

    /// Address used for readiness and occupancy probes. Defaults to the record name.
    #[arg(long, env = "MC_SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// Port used for readiness and occupancy probes.
    #[arg(long, env = "MC_SERVER_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    pub server_port: u16,

    /// Task definition that restores world data before the server starts.
    #[arg(long, env = "PULL_TASK_NAME", default_value = "s3-pull")]
    pub restore_task: String,

    /// Task definition that persists world data after the server stops.
    #[arg(long, env = "PUSH_TASK_NAME", default_value = "s3-push")]
    pub persist_task: String,

    /// Task definition running the game server.
    #[arg(long, env = "MC_SERVER_TASK_NAME", default_value = "mc-server")]
    pub server_task: String,

    /// Consecutive empty observations tolerated before the session is declared idle.
    #[arg(long, env = "IDLE_TICK_THRESHOLD", default_value_t = 60)]
    pub idle_threshold: u32,

    /// Seconds between occupancy observations.
    #[arg(long, env = "OCCUPANCY_POLL_INTERVAL_SECS", default_value_t = DEFAULT_OCCUPANCY_INTERVAL.as_secs())]
    pub occupancy_interval_secs: u64,

    /// Seconds between task status checks.
    #[arg(long, env = "TASK_POLL_INTERVAL_SECS", default_value_t = DEFAULT_TASK_POLL_INTERVAL.as_secs())]
    pub task_poll_interval_secs: u64,

    /// Timeout for a single connect check or status query, in milliseconds.
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 1000)]
    pub probe_timeout_ms: u64,

    /// Upper bound for the readiness retry backoff, in seconds.
    #[arg(long, env = "READY_BACKOFF_MAX_SECS", default_value_t = 5)]
    pub ready_backoff_max_secs: u64,

    /// TTL of the published A-record, in seconds.
    #[arg(long, env = "DNS_RECORD_TTL", default_value_t = 60)]
    pub dns_ttl: u32,

    /// How the watchdog counts an observation whose status query failed.
    #[arg(long, env = "ON_PROBE_FAILURE", value_enum, default_value_t = ProbeFailurePolicy::Skip)]
    pub on_probe_failure: ProbeFailurePolicy,

    /// Wait for the cluster to report zero registered instances after scaling down.
    #[arg(long, env = "AWAIT_DRAIN")]
    pub await_drain: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "IDLEFLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "IDLEFLEET_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    /// Reject values that would make the session misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("record name", &self.record_name),
            ("hosted zone id", &self.hosted_zone_id),
            ("cluster", &self.cluster),
            ("restore task", &self.restore_task),
            ("persist task", &self.persist_task),
            ("server task", &self.server_task),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }
        if matches!(&self.fleet_name, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::Empty("fleet name"));
        }

        let positive = [
            ("server port", u64::from(self.server_port)),
            ("occupancy interval", self.occupancy_interval_secs),
            ("task poll interval", self.task_poll_interval_secs),
            ("probe timeout", self.probe_timeout_ms),
            ("ready backoff cap", self.ready_backoff_max_secs),
            ("dns ttl", u64::from(self.dns_ttl)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.idle_threshold > MAX_IDLE_THRESHOLD {
            return Err(ConfigError::TooLarge {
                name: "idle threshold",
                max: u64::from(MAX_IDLE_THRESHOLD),
            });
        }
        Ok(())
    }

    /// Parse from command-line arguments alone, ignoring environment variables.
    pub fn try_parse_args_only<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(args)?;
        Self::from_arg_matches(&matches)
    }

    /// Endpoint probed for readiness and occupancy.
    pub fn probe_endpoint(&self) -> ServerEndpoint {
        let host = self
            .server_address
            .clone()
            .unwrap_or_else(|| self.record_name.trim_end_matches('.').to_string());
        ServerEndpoint::new(host, self.server_port)
    }

    pub fn occupancy_interval(&self) -> Duration {
        Duration::from_secs(self.occupancy_interval_secs)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_secs(self.task_poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn ready_backoff_max(&self) -> Duration {
        Duration::from_secs(self.ready_backoff_max_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::try_parse_args_only([
        "idlefleet",
        "--record-name",
        "mc.example.com",
        "--hosted-zone-id",
        "Z0123456789",
        "--cluster",
        "ecs-minecraft",
    ])
    .unwrap()
}

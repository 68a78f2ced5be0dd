//! Readiness probing.
//!
//! A launched server task is not the same as a usable server. The prober
//! bridges the gap: it waits until the game port accepts connections and
//! the server answers a status query.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use idlefleet_mcstatus::{ServerStatus, StatusClient, StatusError};
use idlefleet_poll::{Backoff, Pacer, Sleeper};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Host and port the game server is probed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Probe failures.
///
/// Everything except `Fatal` is an expected condition while a server boots
/// or restarts and is retried by the calling loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Fatal(String),
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProbeError::Fatal(_))
    }
}

impl From<StatusError> for ProbeError {
    fn from(err: StatusError) -> Self {
        if !err.is_transient() {
            return ProbeError::Fatal(err.to_string());
        }
        match err {
            StatusError::Timeout(_) => ProbeError::Timeout,
            StatusError::Malformed(_) | StatusError::Json(_) => {
                ProbeError::Malformed(err.to_string())
            }
            StatusError::Resolve { .. } | StatusError::Connect(_) | StatusError::Io(_) => {
                ProbeError::Unreachable(err.to_string())
            }
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub online: u32,
    pub max: u32,
    pub version: String,
    pub motd: String,
    /// Names from the server's player sample, which may be partial.
    pub sample: Vec<String>,
}

impl From<ServerStatus> for StatusSnapshot {
    fn from(status: ServerStatus) -> Self {
        Self {
            online: status.players.online,
            max: status.players.max,
            motd: status.motd(),
            sample: status
                .players
                .sample
                .into_iter()
                .map(|player| player.name)
                .collect(),
            version: status.version.name,
        }
    }
}

/// Game status protocol.
#[async_trait]
pub trait GameStatus: Send + Sync {
    /// Open and close a connection to the game port.
    async fn connect_check(&self, endpoint: &ServerEndpoint) -> std::result::Result<(), ProbeError>;

    /// Full protocol status query.
    async fn query(&self, endpoint: &ServerEndpoint)
        -> std::result::Result<StatusSnapshot, ProbeError>;
}

/// [`GameStatus`] over the Server List Ping protocol.
pub struct SlpGameStatus {
    client: StatusClient,
}

impl SlpGameStatus {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: StatusClient::new(timeout),
        }
    }
}

#[async_trait]
impl GameStatus for SlpGameStatus {
    async fn connect_check(&self, endpoint: &ServerEndpoint) -> std::result::Result<(), ProbeError> {
        self.client
            .connect_check(&endpoint.host, endpoint.port)
            .await
            .map_err(ProbeError::from)
    }

    async fn query(
        &self,
        endpoint: &ServerEndpoint,
    ) -> std::result::Result<StatusSnapshot, ProbeError> {
        let status = self.client.status(&endpoint.host, endpoint.port).await?;
        Ok(StatusSnapshot::from(status))
    }
}

/// Blocks until the game server is reachable and protocol-responsive.
pub struct ReadinessProber {
    status: Arc<dyn GameStatus>,
    sleeper: Arc<dyn Sleeper>,
    backoff: Backoff,
}

impl ReadinessProber {
    pub fn new(status: Arc<dyn GameStatus>, sleeper: Arc<dyn Sleeper>, backoff: Backoff) -> Self {
        Self {
            status,
            sleeper,
            backoff,
        }
    }

    /// Wait until both the connect check and a status query succeed.
    ///
    /// Retries transient failures without bound. Returns the number of
    /// attempts it took, or the first non-transient failure.
    pub async fn wait_until_ready(&self, endpoint: &ServerEndpoint) -> Result<u32> {
        let mut pacer = Pacer::new(self.sleeper.clone(), self.backoff);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.probe_once(endpoint).await {
                Ok(snapshot) => {
                    info!(
                        endpoint = %endpoint,
                        attempts,
                        version = %snapshot.version,
                        online = snapshot.online,
                        max = snapshot.max,
                        motd = %snapshot.motd,
                        players = ?snapshot.sample,
                        "Game server is ready"
                    );
                    return Ok(attempts);
                }
                Err(e) if e.is_transient() => {
                    debug!(
                        endpoint = %endpoint,
                        attempts,
                        error = %e,
                        next_delay_ms = pacer.next_delay().as_millis() as u64,
                        "Game server not ready yet"
                    );
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Readiness probe failed permanently");
                    return Err(Error::Probe(e));
                }
            }
            pacer.pause().await;
        }
    }

    async fn probe_once(
        &self,
        endpoint: &ServerEndpoint,
    ) -> std::result::Result<StatusSnapshot, ProbeError> {
        self.status.connect_check(endpoint).await?;
        self.status.query(endpoint).await
    }
}

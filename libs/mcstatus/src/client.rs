//! Status query client.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Buf;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec;
use crate::status::ServerStatus;
use crate::StatusError;

/// Protocol version announced in the handshake. Servers answer status
/// queries for any version, so an old, widely accepted value is used.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 47;

/// Server List Ping client.
///
/// Each call opens a fresh connection. Every call is bounded by the client's
/// timeout, covering resolution, connect, and the whole exchange.
#[derive(Debug, Clone)]
pub struct StatusClient {
    timeout: Duration,
}

impl StatusClient {
    /// Create a client with the given per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Open a TCP connection and shut it down again.
    pub async fn connect_check(&self, host: &str, port: u16) -> Result<(), StatusError> {
        self.bounded(async {
            let mut stream = connect(host, port).await?;
            stream.shutdown().await?;
            Ok(())
        })
        .await
    }

    /// Query the status document.
    pub async fn status(&self, host: &str, port: u16) -> Result<ServerStatus, StatusError> {
        self.bounded(async {
            let mut stream = connect(host, port).await?;
            self.begin_status(&mut stream, host, port).await?;
            stream.write_all(&codec::status_request()).await?;

            let frame = codec::read_frame(&mut stream).await?;
            let (packet_id, mut body) = codec::split_packet(frame)?;
            if packet_id != codec::STATUS_ID {
                return Err(StatusError::Malformed(format!(
                    "expected status response, got packet 0x{packet_id:02x}"
                )));
            }
            let document = codec::get_string(&mut body)?;
            let status = ServerStatus::from_json(&document)?;

            debug!(
                host,
                port,
                online = status.players.online,
                max = status.players.max,
                version = %status.version.name,
                "Status query answered"
            );
            Ok(status)
        })
        .await
    }

    /// Measure round-trip latency with a ping/pong exchange.
    pub async fn ping(&self, host: &str, port: u16) -> Result<Duration, StatusError> {
        self.bounded(async {
            let mut stream = connect(host, port).await?;
            self.begin_status(&mut stream, host, port).await?;

            let payload = epoch_millis();
            let started = Instant::now();
            stream.write_all(&codec::ping(payload)).await?;

            let frame = codec::read_frame(&mut stream).await?;
            let elapsed = started.elapsed();
            let (packet_id, mut body) = codec::split_packet(frame)?;
            if packet_id != codec::PING_ID || body.remaining() < 8 {
                return Err(StatusError::Malformed(format!(
                    "expected pong, got packet 0x{packet_id:02x}"
                )));
            }
            let echoed = body.get_i64();
            if echoed != payload {
                return Err(StatusError::Malformed(format!(
                    "pong payload {echoed} does not match ping {payload}"
                )));
            }
            Ok(elapsed)
        })
        .await
    }

    async fn begin_status(
        &self,
        stream: &mut TcpStream,
        host: &str,
        port: u16,
    ) -> Result<(), StatusError> {
        stream
            .write_all(&codec::handshake(DEFAULT_PROTOCOL_VERSION, host, port))
            .await?;
        Ok(())
    }

    async fn bounded<T>(
        &self,
        exchange: impl Future<Output = Result<T, StatusError>>,
    ) -> Result<T, StatusError> {
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(StatusError::Timeout(self.timeout)),
        }
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, StatusError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| StatusError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(StatusError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(StatusError::Connect(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "no address accepted the connection")
    })))
}

fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

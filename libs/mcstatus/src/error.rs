//! Error types for status queries.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while querying a server.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The exchange did not complete within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The host name did not resolve to any address.
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The TCP connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// The connection failed mid-exchange.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The server sent bytes that do not form a valid packet.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The status payload is not the expected JSON document.
    #[error("invalid status document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StatusError {
    /// Returns true for conditions expected while a server is starting up or
    /// restarting: timeouts, refused or dropped connections, unresolvable
    /// names (DNS not yet propagated), and garbage from a half-started server.
    pub fn is_transient(&self) -> bool {
        match self {
            StatusError::Timeout(_)
            | StatusError::Resolve { .. }
            | StatusError::Malformed(_)
            | StatusError::Json(_) => true,
            StatusError::Connect(e) | StatusError::Io(e) => is_transient_io(e.kind()),
        }
    }
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused)]
    #[case(io::ErrorKind::ConnectionReset)]
    #[case(io::ErrorKind::HostUnreachable)]
    #[case(io::ErrorKind::NetworkUnreachable)]
    #[case(io::ErrorKind::NetworkDown)]
    #[case(io::ErrorKind::Interrupted)]
    #[case(io::ErrorKind::WouldBlock)]
    fn test_network_conditions_are_transient(#[case] kind: io::ErrorKind) {
        assert!(StatusError::Connect(io::Error::from(kind)).is_transient());
        assert!(StatusError::Io(io::Error::from(kind)).is_transient());
    }

    #[test]
    fn test_permission_denied_is_not_transient() {
        let err = StatusError::Connect(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(StatusError::Timeout(Duration::from_secs(1)).is_transient());
    }
}

//! Error taxonomy for a session.
//!
//! Transient probe failures never appear here: they are retried inside the
//! readiness and occupancy loops. Everything that does appear aborts the
//! session and leaves partial external state for the operator.

use thiserror::Error;

use crate::probe::ProbeError;

/// Session errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The fleet backing the cluster could not be determined.
    #[error("fleet resolution failed: {0}")]
    Resolution(String),

    /// A task could not be started.
    #[error("failed to launch task {definition}: {reason}")]
    Launch { definition: String, reason: String },

    /// A running task could not be described or stopped.
    #[error("task {task_arn}: {reason}")]
    Task { task_arn: String, reason: String },

    /// A DNS record mutation failed.
    #[error("dns change failed: {0}")]
    Dns(String),

    /// Changing fleet capacity failed.
    #[error("capacity change failed: {0}")]
    Capacity(String),

    /// A probe failed in a way that retrying will not fix.
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
}

impl Error {
    pub(crate) fn launch(definition: &str, reason: impl ToString) -> Self {
        Error::Launch {
            definition: definition.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn task(task_arn: &str, reason: impl ToString) -> Self {
        Error::Task {
            task_arn: task_arn.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

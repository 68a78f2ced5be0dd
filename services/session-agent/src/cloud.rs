//! Collaborator interfaces.
//!
//! The session talks to three external control planes:
//! - Compute: registered cluster instances and task run/describe/stop
//! - Fleet: desired capacity of the auto-scaling group
//! - DNS: A-record upsert/delete
//!
//! Production implementations live in `aws`, in-memory ones in `mock`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;

/// Instance tag naming the auto-scaling group an instance belongs to.
pub const FLEET_TAG: &str = "aws:autoscaling:groupName";

/// A failed call to an external API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct ApiError {
    pub operation: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Name of the fleet (auto-scaling group) backing the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FleetId(String);

impl FleetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FleetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The compute instance behind a registered cluster instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDetails {
    pub instance_id: String,
    pub public_ip: Option<Ipv4Addr>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceDetails {
    /// Fleet this instance belongs to, read from its membership tag.
    pub fn fleet_id(&self) -> Option<FleetId> {
        self.tags.get(FLEET_TAG).map(FleetId::new)
    }
}

/// Lifecycle status of a task as reported by the compute API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    Deleted,
    Other(String),
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PROVISIONING" => TaskStatus::Provisioning,
            "PENDING" => TaskStatus::Pending,
            "ACTIVATING" => TaskStatus::Activating,
            "RUNNING" => TaskStatus::Running,
            "DEACTIVATING" => TaskStatus::Deactivating,
            "STOPPING" => TaskStatus::Stopping,
            "DEPROVISIONING" => TaskStatus::Deprovisioning,
            "STOPPED" => TaskStatus::Stopped,
            "DELETED" => TaskStatus::Deleted,
            _ => TaskStatus::Other(raw.to_string()),
        }
    }

    /// No further transition happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Deleted)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Provisioning => "PROVISIONING",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Activating => "ACTIVATING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Deactivating => "DEACTIVATING",
            TaskStatus::Stopping => "STOPPING",
            TaskStatus::Deprovisioning => "DEPROVISIONING",
            TaskStatus::Stopped => "STOPPED",
            TaskStatus::Deleted => "DELETED",
            TaskStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription {
    pub task_arn: String,
    pub last_status: TaskStatus,
    pub stopped_reason: Option<String>,
}

/// DNS change action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Upsert,
    Delete,
}

/// An A-record owned by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub zone_id: String,
    pub address: Ipv4Addr,
    pub ttl: u32,
}

/// Compute orchestration API.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Identifiers of the instances registered with the cluster.
    async fn list_registered_instances(&self) -> Result<Vec<String>, ApiError>;

    /// The compute instance behind a registered cluster instance.
    async fn describe_registered_instance(
        &self,
        container_instance: &str,
    ) -> Result<InstanceDetails, ApiError>;

    /// Number of instances currently registered with the cluster.
    async fn registered_instance_count(&self) -> Result<u32, ApiError>;

    /// Start one task from a task definition.
    async fn run_task(&self, definition: &str) -> Result<Vec<TaskDescription>, ApiError>;

    /// Current state of a task, or `None` if the cluster no longer knows it.
    async fn describe_task(&self, task_arn: &str) -> Result<Option<TaskDescription>, ApiError>;

    /// Ask the cluster to stop a task. Does not wait.
    async fn stop_task(&self, task_arn: &str, reason: &str) -> Result<(), ApiError>;
}

/// Fleet scaling API.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn set_desired_capacity(&self, fleet: &FleetId, capacity: u32) -> Result<(), ApiError>;
}

/// DNS record API.
#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn change_record(&self, action: RecordAction, record: &DnsRecord)
        -> Result<(), ApiError>;
}

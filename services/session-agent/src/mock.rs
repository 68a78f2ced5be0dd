//! In-memory collaborators for testing and development.
//!
//! Each mock records every call it receives and can be scripted to return
//! specific task statuses, probe answers, or failures.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::cloud::{
    ApiError, ComputeApi, DnsApi, DnsRecord, FleetApi, FleetId, InstanceDetails, RecordAction,
    TaskDescription, TaskStatus, FLEET_TAG,
};
use crate::probe::{GameStatus, ProbeError, ServerEndpoint, StatusSnapshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build instance details tagged as a member of `fleet`.
pub fn fleet_instance(instance_id: &str, fleet: &str, public_ip: Option<Ipv4Addr>) -> InstanceDetails {
    let mut tags = BTreeMap::new();
    tags.insert(FLEET_TAG.to_string(), fleet.to_string());
    InstanceDetails {
        instance_id: instance_id.to_string(),
        public_ip,
        tags,
    }
}

/// A call received by [`MockCompute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCall {
    ListInstances,
    DescribeInstance(String),
    RegisteredCount,
    RunTask(String),
    DescribeTask(String),
    StopTask(String),
}

#[derive(Debug)]
struct MockTask {
    definition: String,
    script: VecDeque<TaskStatus>,
    last: TaskStatus,
    stopped_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ComputeState {
    instances: Vec<(String, InstanceDetails)>,
    scripts: HashMap<String, Vec<TaskStatus>>,
    failing_launches: HashSet<String>,
    empty_launches: HashSet<String>,
    failing_describes: bool,
    registered_counts: VecDeque<u32>,
    tasks: HashMap<String, MockTask>,
    calls: Vec<ComputeCall>,
    next_task: u64,
}

/// Mock compute cluster.
///
/// Launched tasks start in `PROVISIONING`, then each describe consumes the
/// next status from the task definition's script. Once the script is used
/// up the task holds its last status until it is stopped, after which it
/// reports `STOPPING` once and `STOPPED` from then on.
#[derive(Debug, Default)]
pub struct MockCompute {
    state: Mutex<ComputeState>,
}

impl MockCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cluster instance.
    pub fn with_instance(self, container_instance: &str, details: InstanceDetails) -> Self {
        lock(&self.state)
            .instances
            .push((container_instance.to_string(), details));
        self
    }

    /// Statuses reported by successive describes of tasks from `definition`.
    pub fn with_task_script(self, definition: &str, statuses: Vec<TaskStatus>) -> Self {
        lock(&self.state)
            .scripts
            .insert(definition.to_string(), statuses);
        self
    }

    /// Make run-task calls for `definition` fail.
    pub fn with_failing_launch(self, definition: &str) -> Self {
        lock(&self.state)
            .failing_launches
            .insert(definition.to_string());
        self
    }

    /// Make run-task calls for `definition` succeed without starting a task.
    pub fn with_empty_launch(self, definition: &str) -> Self {
        lock(&self.state)
            .empty_launches
            .insert(definition.to_string());
        self
    }

    /// Make every describe-task call fail.
    pub fn with_failing_describes(self) -> Self {
        lock(&self.state).failing_describes = true;
        self
    }

    /// Values returned by successive registered-instance counts. The last
    /// value repeats; with no values the count of registered instances is used.
    pub fn with_registered_counts(self, counts: Vec<u32>) -> Self {
        lock(&self.state).registered_counts = counts.into();
        self
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<ComputeCall> {
        lock(&self.state).calls.clone()
    }

    /// Task definitions launched so far, in order.
    pub fn launched(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                ComputeCall::RunTask(definition) => Some(definition.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of describe calls made for a task.
    pub fn describe_count(&self, task_arn: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, ComputeCall::DescribeTask(arn) if arn == task_arn))
            .count()
    }

    /// Whether a stop was requested for a task.
    pub fn was_stopped(&self, task_arn: &str) -> bool {
        lock(&self.state)
            .calls
            .iter()
            .any(|call| matches!(call, ComputeCall::StopTask(arn) if arn == task_arn))
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    async fn list_registered_instances(&self) -> Result<Vec<String>, ApiError> {
        let mut state = lock(&self.state);
        state.calls.push(ComputeCall::ListInstances);
        Ok(state.instances.iter().map(|(arn, _)| arn.clone()).collect())
    }

    async fn describe_registered_instance(
        &self,
        container_instance: &str,
    ) -> Result<InstanceDetails, ApiError> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(ComputeCall::DescribeInstance(container_instance.to_string()));
        state
            .instances
            .iter()
            .find(|(arn, _)| arn == container_instance)
            .map(|(_, details)| details.clone())
            .ok_or_else(|| {
                ApiError::new(
                    "describe_container_instances",
                    format!("{container_instance} is not registered"),
                )
            })
    }

    async fn registered_instance_count(&self) -> Result<u32, ApiError> {
        let mut state = lock(&self.state);
        state.calls.push(ComputeCall::RegisteredCount);
        let count = match state.registered_counts.len() {
            0 => state.instances.len() as u32,
            1 => state.registered_counts[0],
            _ => state.registered_counts.pop_front().unwrap_or_default(),
        };
        Ok(count)
    }

    async fn run_task(&self, definition: &str) -> Result<Vec<TaskDescription>, ApiError> {
        let mut state = lock(&self.state);
        state.calls.push(ComputeCall::RunTask(definition.to_string()));

        if state.failing_launches.contains(definition) {
            return Err(ApiError::new("run_task", "mock launch failure"));
        }
        if state.empty_launches.contains(definition) {
            return Ok(Vec::new());
        }

        state.next_task += 1;
        let task_arn = format!(
            "arn:aws:ecs:mock:000000000000:task/mock/{definition}-{:04}",
            state.next_task
        );
        let script = state
            .scripts
            .get(definition)
            .cloned()
            .unwrap_or_else(|| vec![TaskStatus::Running]);
        state.tasks.insert(
            task_arn.clone(),
            MockTask {
                definition: definition.to_string(),
                script: script.into(),
                last: TaskStatus::Provisioning,
                stopped_reason: None,
            },
        );

        debug!(task_arn = %task_arn, definition, "[MOCK] Task launched");
        Ok(vec![TaskDescription {
            task_arn,
            last_status: TaskStatus::Provisioning,
            stopped_reason: None,
        }])
    }

    async fn describe_task(&self, task_arn: &str) -> Result<Option<TaskDescription>, ApiError> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(ComputeCall::DescribeTask(task_arn.to_string()));
        if state.failing_describes {
            return Err(ApiError::new("describe_tasks", "mock describe failure"));
        }

        let Some(task) = state.tasks.get_mut(task_arn) else {
            return Ok(None);
        };
        if let Some(next) = task.script.pop_front() {
            task.last = next;
        } else if task.last == TaskStatus::Stopping {
            task.last = TaskStatus::Stopped;
        }
        if task.last.is_terminal() && task.stopped_reason.is_none() {
            task.stopped_reason = Some(format!("Essential container in {} exited", task.definition));
        }

        Ok(Some(TaskDescription {
            task_arn: task_arn.to_string(),
            last_status: task.last.clone(),
            stopped_reason: task.stopped_reason.clone(),
        }))
    }

    async fn stop_task(&self, task_arn: &str, reason: &str) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        state.calls.push(ComputeCall::StopTask(task_arn.to_string()));

        let task = state
            .tasks
            .get_mut(task_arn)
            .ok_or_else(|| ApiError::new("stop_task", format!("{task_arn} not found")))?;
        if !task.last.is_terminal() {
            task.script.clear();
            task.script.push_back(TaskStatus::Stopping);
            task.stopped_reason = Some(reason.to_string());
        }
        Ok(())
    }
}

/// Mock fleet scaling API.
#[derive(Debug, Default)]
pub struct MockFleet {
    changes: Mutex<Vec<(FleetId, u32)>>,
    fail: bool,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fleet API whose every call fails.
    pub fn failing() -> Self {
        Self {
            changes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Desired-capacity changes received so far.
    pub fn changes(&self) -> Vec<(FleetId, u32)> {
        lock(&self.changes).clone()
    }
}

#[async_trait]
impl FleetApi for MockFleet {
    async fn set_desired_capacity(&self, fleet: &FleetId, capacity: u32) -> Result<(), ApiError> {
        if self.fail {
            return Err(ApiError::new("update_auto_scaling_group", "mock fleet failure"));
        }
        lock(&self.changes).push((fleet.clone(), capacity));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DnsState {
    records: HashMap<(String, String), DnsRecord>,
    changes: Vec<(RecordAction, DnsRecord)>,
}

/// Mock DNS zone.
///
/// UPSERT replaces the record. DELETE succeeds only when the record exists
/// with exactly the given value, like a real DNS change batch.
#[derive(Debug, Default)]
pub struct MockDns {
    state: Mutex<DnsState>,
    fail: bool,
    fail_deletes: bool,
}

impl MockDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// A DNS API whose every call fails.
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(DnsState::default()),
            fail: true,
            fail_deletes: false,
        }
    }

    /// A DNS API that accepts upserts but rejects every delete.
    pub fn failing_deletes() -> Self {
        Self {
            state: Mutex::new(DnsState::default()),
            fail: false,
            fail_deletes: true,
        }
    }

    /// Records currently present.
    pub fn records(&self) -> Vec<DnsRecord> {
        lock(&self.state).records.values().cloned().collect()
    }

    /// Changes received so far.
    pub fn changes(&self) -> Vec<(RecordAction, DnsRecord)> {
        lock(&self.state).changes.clone()
    }
}

#[async_trait]
impl DnsApi for MockDns {
    async fn change_record(
        &self,
        action: RecordAction,
        record: &DnsRecord,
    ) -> Result<(), ApiError> {
        if self.fail || (self.fail_deletes && action == RecordAction::Delete) {
            return Err(ApiError::new("change_resource_record_sets", "mock dns failure"));
        }

        let mut state = lock(&self.state);
        state.changes.push((action, record.clone()));
        let key = (record.zone_id.clone(), record.name.clone());
        match action {
            RecordAction::Upsert => {
                state.records.insert(key, record.clone());
                Ok(())
            }
            RecordAction::Delete => match state.records.get(&key) {
                Some(existing) if existing == record => {
                    state.records.remove(&key);
                    Ok(())
                }
                _ => Err(ApiError::new(
                    "change_resource_record_sets",
                    format!(
                        "record {} with value {} not found",
                        record.name, record.address
                    ),
                )),
            },
        }
    }
}

#[derive(Debug, Default)]
struct StatusState {
    connects: VecDeque<Result<(), ProbeError>>,
    queries: VecDeque<Result<StatusSnapshot, ProbeError>>,
    connect_calls: usize,
    query_calls: usize,
}

/// Mock game status endpoint.
///
/// Connect checks succeed once their script is used up. Status queries fail
/// with a fatal error once theirs is, so a loop that polls more often than
/// expected surfaces in tests instead of spinning.
#[derive(Debug, Default)]
pub struct MockGameStatus {
    state: Mutex<StatusState>,
}

impl MockGameStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_results(self, results: Vec<Result<(), ProbeError>>) -> Self {
        lock(&self.state).connects.extend(results);
        self
    }

    pub fn with_query_results(self, results: Vec<Result<StatusSnapshot, ProbeError>>) -> Self {
        lock(&self.state).queries.extend(results);
        self
    }

    /// Append successful status answers reporting these player counts.
    pub fn with_occupancy(self, counts: Vec<u32>) -> Self {
        lock(&self.state)
            .queries
            .extend(counts.into_iter().map(|online| {
                Ok(StatusSnapshot {
                    online,
                    max: 20,
                    version: "mock".to_string(),
                    motd: String::new(),
                    sample: Vec::new(),
                })
            }));
        self
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.state).connect_calls
    }

    pub fn query_calls(&self) -> usize {
        lock(&self.state).query_calls
    }

    /// Scripted answers not consumed yet.
    pub fn remaining_queries(&self) -> usize {
        lock(&self.state).queries.len()
    }
}

#[async_trait]
impl GameStatus for MockGameStatus {
    async fn connect_check(&self, _endpoint: &ServerEndpoint) -> Result<(), ProbeError> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        state.connects.pop_front().unwrap_or(Ok(()))
    }

    async fn query(&self, _endpoint: &ServerEndpoint) -> Result<StatusSnapshot, ProbeError> {
        let mut state = lock(&self.state);
        state.query_calls += 1;
        state
            .queries
            .pop_front()
            .unwrap_or_else(|| Err(ProbeError::Fatal("status script exhausted".to_string())))
    }
}

//! Task runner.
//!
//! Starts named units of work on the cluster and follows them to a terminal
//! status. Waiting has no timeout: restore and persist jobs take as long as
//! the world data takes to copy.

use std::sync::Arc;
use std::time::Duration;

use idlefleet_poll::{Pacer, Sleeper};
use tracing::{debug, info};

use crate::cloud::{ComputeApi, TaskDescription, TaskStatus};
use crate::error::{Error, Result};

/// Handle to one launched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_arn: String,
    pub definition: String,
    pub last_status: TaskStatus,
    pub stopped_reason: Option<String>,
}

impl TaskHandle {
    fn observe(&mut self, description: TaskDescription) {
        self.last_status = description.last_status;
        self.stopped_reason = description.stopped_reason;
    }

    pub fn is_terminal(&self) -> bool {
        self.last_status.is_terminal()
    }
}

/// Launches, stops, and awaits cluster tasks.
pub struct TaskRunner {
    compute: Arc<dyn ComputeApi>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
}

impl TaskRunner {
    pub fn new(compute: Arc<dyn ComputeApi>, sleeper: Arc<dyn Sleeper>, poll_interval: Duration) -> Self {
        Self {
            compute,
            sleeper,
            poll_interval,
        }
    }

    /// Start one task from `definition`.
    pub async fn launch(&self, definition: &str) -> Result<TaskHandle> {
        let tasks = self
            .compute
            .run_task(definition)
            .await
            .map_err(|e| Error::launch(definition, e))?;

        let Some(task) = tasks.into_iter().next() else {
            return Err(Error::launch(definition, "no task was started"));
        };

        info!(
            definition,
            task_arn = %task.task_arn,
            status = %task.last_status,
            "Task launched"
        );
        Ok(TaskHandle {
            task_arn: task.task_arn,
            definition: definition.to_string(),
            last_status: task.last_status,
            stopped_reason: task.stopped_reason,
        })
    }

    /// Poll until the task reaches a terminal status.
    ///
    /// Returns as soon as a terminal status is observed, with the number of
    /// observations made.
    pub async fn await_terminal(&self, handle: &mut TaskHandle) -> Result<u32> {
        let mut pacer = Pacer::fixed(self.sleeper.clone(), self.poll_interval);
        let mut observations = 0u32;

        loop {
            let description = self
                .compute
                .describe_task(&handle.task_arn)
                .await
                .map_err(|e| Error::task(&handle.task_arn, e))?
                .ok_or_else(|| Error::task(&handle.task_arn, "task is no longer known to the cluster"))?;
            observations += 1;

            if description.last_status != handle.last_status {
                info!(
                    task_arn = %handle.task_arn,
                    definition = %handle.definition,
                    from = %handle.last_status,
                    to = %description.last_status,
                    "Task status changed"
                );
            } else {
                debug!(
                    task_arn = %handle.task_arn,
                    status = %description.last_status,
                    "Task status unchanged"
                );
            }
            handle.observe(description);

            if handle.is_terminal() {
                info!(
                    task_arn = %handle.task_arn,
                    definition = %handle.definition,
                    status = %handle.last_status,
                    stopped_reason = handle.stopped_reason.as_deref().unwrap_or(""),
                    observations,
                    "Task reached terminal status"
                );
                return Ok(observations);
            }
            pacer.pause().await;
        }
    }

    /// Request early termination. Does not wait for the task to stop.
    pub async fn stop(&self, handle: &TaskHandle, reason: &str) -> Result<()> {
        self.compute
            .stop_task(&handle.task_arn, reason)
            .await
            .map_err(|e| Error::task(&handle.task_arn, e))?;
        info!(task_arn = %handle.task_arn, reason, "Task stop requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCompute;
    use idlefleet_poll::ManualSleeper;

    fn runner(compute: Arc<MockCompute>, sleeper: Arc<ManualSleeper>) -> TaskRunner {
        TaskRunner::new(compute, sleeper, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_await_returns_on_first_terminal_observation() {
        let compute = Arc::new(MockCompute::new().with_task_script(
            "s3-pull",
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Stopped],
        ));
        let sleeper = Arc::new(ManualSleeper::new());
        let runner = runner(compute.clone(), sleeper.clone());

        let mut handle = runner.launch("s3-pull").await.unwrap();
        assert_eq!(handle.last_status, TaskStatus::Provisioning);

        let observations = runner.await_terminal(&mut handle).await.unwrap();
        assert_eq!(observations, 3);
        assert_eq!(handle.last_status, TaskStatus::Stopped);
        assert!(handle.stopped_reason.is_some());
        assert_eq!(compute.describe_count(&handle.task_arn), 3);
        // Sleeps only between observations, never after the terminal one.
        assert_eq!(sleeper.count(), 2);
    }

    #[tokio::test]
    async fn test_await_keeps_polling_non_terminal_statuses() {
        let mut script = vec![TaskStatus::Pending; 10];
        script.extend(vec![TaskStatus::Running; 40]);
        script.push(TaskStatus::Deprovisioning);
        script.push(TaskStatus::Stopped);
        let compute = Arc::new(MockCompute::new().with_task_script("s3-push", script));
        let sleeper = Arc::new(ManualSleeper::new());
        let runner = runner(compute, sleeper.clone());

        let mut handle = runner.launch("s3-push").await.unwrap();
        let observations = runner.await_terminal(&mut handle).await.unwrap();

        assert_eq!(observations, 52);
        assert_eq!(sleeper.elapsed(), Duration::from_secs(51));
    }

    #[tokio::test]
    async fn test_stop_then_await() {
        let compute = Arc::new(MockCompute::new());
        let sleeper = Arc::new(ManualSleeper::new());
        let runner = runner(compute.clone(), sleeper);

        let mut handle = runner.launch("mc-server").await.unwrap();
        runner.stop(&handle, "idle").await.unwrap();
        runner.await_terminal(&mut handle).await.unwrap();

        assert!(compute.was_stopped(&handle.task_arn));
        assert_eq!(handle.last_status, TaskStatus::Stopped);
        assert_eq!(handle.stopped_reason.as_deref(), Some("idle"));
    }

    #[tokio::test]
    async fn test_launch_api_failure() {
        let compute = Arc::new(MockCompute::new().with_failing_launch("s3-pull"));
        let runner = runner(compute, Arc::new(ManualSleeper::new()));

        let err = runner.launch("s3-pull").await.unwrap_err();
        assert!(matches!(err, Error::Launch { ref definition, .. } if definition == "s3-pull"));
    }

    #[tokio::test]
    async fn test_launch_with_no_tasks_is_error() {
        let compute = Arc::new(MockCompute::new().with_empty_launch("mc-server"));
        let runner = runner(compute, Arc::new(ManualSleeper::new()));

        let err = runner.launch("mc-server").await.unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn test_describe_failure_is_task_error() {
        let compute = Arc::new(MockCompute::new().with_failing_describes());
        let runner = runner(compute, Arc::new(ManualSleeper::new()));

        let mut handle = runner.launch("s3-pull").await.unwrap();
        let err = runner.await_terminal(&mut handle).await.unwrap_err();
        assert!(matches!(err, Error::Task { .. }));
    }
}

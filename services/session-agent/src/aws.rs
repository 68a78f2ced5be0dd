//! AWS-backed collaborators.
//!
//! - ECS for the cluster (registered instances and tasks)
//! - EC2 for instance addresses and tags
//! - Auto Scaling for fleet capacity
//! - Route 53 for the session record

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tracing::{debug, warn};

use crate::cloud::{
    ApiError, ComputeApi, DnsApi, DnsRecord, FleetApi, FleetId, InstanceDetails, RecordAction,
    TaskDescription, TaskStatus,
};

fn api_error<E: std::error::Error>(operation: &'static str, err: E) -> ApiError {
    ApiError::new(operation, DisplayErrorContext(err).to_string())
}

fn describe(task: &aws_sdk_ecs::types::Task) -> Option<TaskDescription> {
    Some(TaskDescription {
        task_arn: task.task_arn()?.to_string(),
        last_status: TaskStatus::parse(task.last_status().unwrap_or_default()),
        stopped_reason: task.stopped_reason().map(str::to_string),
    })
}

/// ECS cluster plus the EC2 instances registered with it.
pub struct AwsCompute {
    ecs: aws_sdk_ecs::Client,
    ec2: aws_sdk_ec2::Client,
    cluster: String,
}

impl AwsCompute {
    pub fn new(config: &SdkConfig, cluster: impl Into<String>) -> Self {
        Self {
            ecs: aws_sdk_ecs::Client::new(config),
            ec2: aws_sdk_ec2::Client::new(config),
            cluster: cluster.into(),
        }
    }
}

#[async_trait]
impl ComputeApi for AwsCompute {
    async fn list_registered_instances(&self) -> Result<Vec<String>, ApiError> {
        let output = self
            .ecs
            .list_container_instances()
            .cluster(&self.cluster)
            .send()
            .await
            .map_err(|e| api_error("list_container_instances", e))?;
        Ok(output.container_instance_arns().to_vec())
    }

    async fn describe_registered_instance(
        &self,
        container_instance: &str,
    ) -> Result<InstanceDetails, ApiError> {
        let output = self
            .ecs
            .describe_container_instances()
            .cluster(&self.cluster)
            .container_instances(container_instance)
            .send()
            .await
            .map_err(|e| api_error("describe_container_instances", e))?;

        let instance_id = output
            .container_instances()
            .first()
            .and_then(|ci| ci.ec2_instance_id())
            .ok_or_else(|| {
                ApiError::new(
                    "describe_container_instances",
                    format!("{container_instance} has no EC2 instance"),
                )
            })?
            .to_string();

        let output = self
            .ec2
            .describe_instances()
            .instance_ids(&instance_id)
            .send()
            .await
            .map_err(|e| api_error("describe_instances", e))?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .ok_or_else(|| {
                ApiError::new("describe_instances", format!("{instance_id} not found"))
            })?;

        let public_ip = match instance.public_ip_address() {
            Some(raw) => match raw.parse::<Ipv4Addr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!(instance_id = %instance_id, address = raw, "Ignoring unparseable public address");
                    None
                }
            },
            None => None,
        };
        let tags: BTreeMap<String, String> = instance
            .tags()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
            .collect();

        debug!(instance_id = %instance_id, public_ip = ?public_ip, "Described fleet instance");
        Ok(InstanceDetails {
            instance_id,
            public_ip,
            tags,
        })
    }

    async fn registered_instance_count(&self) -> Result<u32, ApiError> {
        let output = self
            .ecs
            .describe_clusters()
            .clusters(&self.cluster)
            .send()
            .await
            .map_err(|e| api_error("describe_clusters", e))?;

        let cluster = output.clusters().first().ok_or_else(|| {
            ApiError::new("describe_clusters", format!("cluster {} not found", self.cluster))
        })?;
        Ok(u32::try_from(cluster.registered_container_instances_count()).unwrap_or_default())
    }

    async fn run_task(&self, definition: &str) -> Result<Vec<TaskDescription>, ApiError> {
        let output = self
            .ecs
            .run_task()
            .cluster(&self.cluster)
            .task_definition(definition)
            .count(1)
            .send()
            .await
            .map_err(|e| api_error("run_task", e))?;

        if let Some(failure) = output.failures().first() {
            return Err(ApiError::new(
                "run_task",
                format!(
                    "{}: {}",
                    failure.arn().unwrap_or(definition),
                    failure.reason().unwrap_or("unknown failure")
                ),
            ));
        }
        Ok(output.tasks().iter().filter_map(describe).collect())
    }

    async fn describe_task(&self, task_arn: &str) -> Result<Option<TaskDescription>, ApiError> {
        let output = self
            .ecs
            .describe_tasks()
            .cluster(&self.cluster)
            .tasks(task_arn)
            .send()
            .await
            .map_err(|e| api_error("describe_tasks", e))?;

        if let Some(failure) = output.failures().first() {
            // ECS reports unknown tasks as a MISSING failure.
            if failure.reason() == Some("MISSING") {
                return Ok(None);
            }
            return Err(ApiError::new(
                "describe_tasks",
                failure.reason().unwrap_or("unknown failure").to_string(),
            ));
        }
        Ok(output.tasks().first().and_then(describe))
    }

    async fn stop_task(&self, task_arn: &str, reason: &str) -> Result<(), ApiError> {
        self.ecs
            .stop_task()
            .cluster(&self.cluster)
            .task(task_arn)
            .reason(reason)
            .send()
            .await
            .map_err(|e| api_error("stop_task", e))?;
        Ok(())
    }
}

/// Auto Scaling group capacity.
pub struct AwsFleet {
    autoscaling: aws_sdk_autoscaling::Client,
}

impl AwsFleet {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

#[async_trait]
impl FleetApi for AwsFleet {
    async fn set_desired_capacity(&self, fleet: &FleetId, capacity: u32) -> Result<(), ApiError> {
        let capacity = i32::try_from(capacity)
            .map_err(|_| ApiError::new("update_auto_scaling_group", "capacity out of range"))?;
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(fleet.as_str())
            .desired_capacity(capacity)
            .send()
            .await
            .map_err(|e| api_error("update_auto_scaling_group", e))?;
        Ok(())
    }
}

/// Route 53 hosted zone.
pub struct AwsDns {
    route53: aws_sdk_route53::Client,
}

impl AwsDns {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            route53: aws_sdk_route53::Client::new(config),
        }
    }
}

fn change_batch(action: RecordAction, record: &DnsRecord) -> Result<ChangeBatch, ApiError> {
    let build = |e| api_error("change_resource_record_sets", e);
    let action = match action {
        RecordAction::Upsert => ChangeAction::Upsert,
        RecordAction::Delete => ChangeAction::Delete,
    };

    let value = ResourceRecord::builder()
        .value(record.address.to_string())
        .build()
        .map_err(build)?;
    let record_set = ResourceRecordSet::builder()
        .name(&record.name)
        .r#type(RrType::A)
        .ttl(i64::from(record.ttl))
        .resource_records(value)
        .build()
        .map_err(build)?;
    let change = Change::builder()
        .action(action)
        .resource_record_set(record_set)
        .build()
        .map_err(build)?;
    ChangeBatch::builder()
        .changes(change)
        .build()
        .map_err(build)
}

#[async_trait]
impl DnsApi for AwsDns {
    async fn change_record(
        &self,
        action: RecordAction,
        record: &DnsRecord,
    ) -> Result<(), ApiError> {
        let batch = change_batch(action, record)?;
        self.route53
            .change_resource_record_sets()
            .hosted_zone_id(&record.zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| api_error("change_resource_record_sets", e))?;

        debug!(record = %record.name, action = ?action, "DNS change submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DnsRecord {
        DnsRecord {
            name: "mc.example.com".to_string(),
            zone_id: "Z0123".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 5),
            ttl: 60,
        }
    }

    #[test]
    fn test_change_batch_carries_record() {
        let batch = change_batch(RecordAction::Upsert, &record()).unwrap();
        assert_eq!(batch.changes().len(), 1);
        assert_eq!(batch.changes()[0].action(), &ChangeAction::Upsert);

        let rendered = format!("{batch:?}");
        assert!(rendered.contains("mc.example.com"));
        assert!(rendered.contains("10.0.0.5"));
    }

    #[test]
    fn test_delete_batch_uses_delete_action() {
        let batch = change_batch(RecordAction::Delete, &record()).unwrap();
        assert_eq!(batch.changes()[0].action(), &ChangeAction::Delete);
    }
}

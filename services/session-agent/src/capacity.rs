//! Fleet discovery and capacity control.
//!
//! The session is not told which fleet backs the cluster. It reads the
//! membership tag of the first registered instance instead, and later uses
//! that fleet identifier to scale capacity back to zero.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use idlefleet_poll::{Pacer, Sleeper};
use tracing::{debug, info};

use crate::cloud::{ComputeApi, FleetApi, FleetId, InstanceDetails, FLEET_TAG};
use crate::error::{Error, Result};

/// Discovers the fleet behind the cluster's registered instance.
pub struct CapacityResolver {
    compute: Arc<dyn ComputeApi>,
}

impl CapacityResolver {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self { compute }
    }

    /// Fleet identifier of the first registered instance.
    pub async fn resolve_fleet_id(&self) -> Result<FleetId> {
        let instance = self.first_instance().await?;
        let fleet = instance.fleet_id().ok_or_else(|| {
            Error::Resolution(format!(
                "instance {} has no {FLEET_TAG} tag",
                instance.instance_id
            ))
        })?;

        info!(
            fleet_id = %fleet,
            instance_id = %instance.instance_id,
            "Resolved fleet from registered instance"
        );
        Ok(fleet)
    }

    /// Current public address of the instance backing `fleet`.
    pub async fn public_address(&self, fleet: &FleetId) -> Result<Ipv4Addr> {
        let instance = self.first_instance().await?;
        if instance.fleet_id().as_ref() != Some(fleet) {
            return Err(Error::Resolution(format!(
                "registered instance {} does not belong to fleet {fleet}",
                instance.instance_id
            )));
        }

        instance.public_ip.ok_or_else(|| {
            Error::Resolution(format!(
                "instance {} has no public address",
                instance.instance_id
            ))
        })
    }

    async fn first_instance(&self) -> Result<InstanceDetails> {
        let registered = self
            .compute
            .list_registered_instances()
            .await
            .map_err(|e| Error::Resolution(e.to_string()))?;

        let Some(first) = registered.first() else {
            return Err(Error::Resolution(
                "cluster has no registered instances".to_string(),
            ));
        };
        debug!(
            container_instance = %first,
            registered = registered.len(),
            "Describing first registered instance"
        );

        self.compute
            .describe_registered_instance(first)
            .await
            .map_err(|e| Error::Resolution(e.to_string()))
    }
}

/// Changes fleet capacity.
pub struct CapacityController {
    fleet: Arc<dyn FleetApi>,
    compute: Arc<dyn ComputeApi>,
    sleeper: Arc<dyn Sleeper>,
    drain_interval: Duration,
}

impl CapacityController {
    pub fn new(
        fleet: Arc<dyn FleetApi>,
        compute: Arc<dyn ComputeApi>,
        sleeper: Arc<dyn Sleeper>,
        drain_interval: Duration,
    ) -> Self {
        Self {
            fleet,
            compute,
            sleeper,
            drain_interval,
        }
    }

    /// Set the fleet's desired capacity.
    pub async fn scale_to(&self, fleet: &FleetId, capacity: u32) -> Result<()> {
        self.fleet
            .set_desired_capacity(fleet, capacity)
            .await
            .map_err(|e| Error::Capacity(e.to_string()))?;
        info!(fleet_id = %fleet, capacity, "Desired capacity updated");
        Ok(())
    }

    /// Poll until the cluster reports exactly `count` registered instances.
    ///
    /// Returns the number of observations made.
    pub async fn await_registered(&self, count: u32) -> Result<u32> {
        let mut pacer = Pacer::fixed(self.sleeper.clone(), self.drain_interval);
        let mut observations = 0u32;

        loop {
            let current = self
                .compute
                .registered_instance_count()
                .await
                .map_err(|e| Error::Capacity(e.to_string()))?;
            observations += 1;

            info!(
                registered = current,
                target = count,
                "Cluster registered instance count"
            );
            if current == count {
                return Ok(observations);
            }
            pacer.pause().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fleet_instance, MockCompute, MockFleet};
    use idlefleet_poll::ManualSleeper;

    #[tokio::test]
    async fn test_resolves_fleet_from_first_instance() {
        let compute = MockCompute::new()
            .with_instance("ci-1", fleet_instance("i-0abc", "mc-asg", None))
            .with_instance("ci-2", fleet_instance("i-0def", "other-asg", None));
        let resolver = CapacityResolver::new(Arc::new(compute));

        assert_eq!(
            resolver.resolve_fleet_id().await.unwrap(),
            FleetId::new("mc-asg")
        );
    }

    #[tokio::test]
    async fn test_untagged_instance_fails_resolution() {
        let mut details = fleet_instance("i-0abc", "mc-asg", None);
        details.tags.clear();
        let resolver = CapacityResolver::new(Arc::new(
            MockCompute::new().with_instance("ci-1", details),
        ));

        let err = resolver.resolve_fleet_id().await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[tokio::test]
    async fn test_public_address_requires_matching_fleet() {
        let compute = MockCompute::new().with_instance(
            "ci-1",
            fleet_instance("i-0abc", "mc-asg", Some(Ipv4Addr::new(10, 0, 0, 5))),
        );
        let resolver = CapacityResolver::new(Arc::new(compute));

        assert_eq!(
            resolver
                .public_address(&FleetId::new("mc-asg"))
                .await
                .unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
        assert!(resolver
            .public_address(&FleetId::new("other-asg"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_scale_failure_is_capacity_error() {
        let controller = CapacityController::new(
            Arc::new(MockFleet::failing()),
            Arc::new(MockCompute::new()),
            Arc::new(ManualSleeper::new()),
            Duration::from_secs(10),
        );

        let err = controller
            .scale_to(&FleetId::new("mc-asg"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[tokio::test]
    async fn test_await_registered_polls_until_target() {
        let compute = Arc::new(MockCompute::new().with_registered_counts(vec![2, 1, 0]));
        let sleeper = Arc::new(ManualSleeper::new());
        let controller = CapacityController::new(
            Arc::new(MockFleet::new()),
            compute,
            sleeper.clone(),
            Duration::from_secs(10),
        );

        assert_eq!(controller.await_registered(0).await.unwrap(), 3);
        assert_eq!(sleeper.elapsed(), Duration::from_secs(20));
    }
}

//! Network publisher.
//!
//! Points the session's DNS name at the fleet instance's public address.
//! Publishing returns a [`DnsLease`] that remembers the exact record value;
//! teardown deletes that value rather than re-resolving the address, so an
//! address change mid-session cannot strand the record.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::info;

use crate::capacity::CapacityResolver;
use crate::cloud::{DnsApi, DnsRecord, FleetId, RecordAction};
use crate::error::{Error, Result};

/// A published record owned by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsLease {
    record: DnsRecord,
}

impl DnsLease {
    pub fn record(&self) -> &DnsRecord {
        &self.record
    }

    pub fn address(&self) -> Ipv4Addr {
        self.record.address
    }
}

/// Creates and removes the session's A-record.
pub struct NetworkPublisher {
    dns: Arc<dyn DnsApi>,
    resolver: Arc<CapacityResolver>,
    record_name: String,
    zone_id: String,
    ttl: u32,
}

impl NetworkPublisher {
    pub fn new(
        dns: Arc<dyn DnsApi>,
        resolver: Arc<CapacityResolver>,
        record_name: impl Into<String>,
        zone_id: impl Into<String>,
        ttl: u32,
    ) -> Self {
        Self {
            dns,
            resolver,
            record_name: record_name.into(),
            zone_id: zone_id.into(),
            ttl,
        }
    }

    /// UPSERT the record to the fleet's current public address.
    pub async fn publish(&self, fleet: &FleetId) -> Result<DnsLease> {
        let address = self
            .resolver
            .public_address(fleet)
            .await
            .map_err(|e| Error::Dns(format!("cannot resolve address of fleet {fleet}: {e}")))?;

        let record = DnsRecord {
            name: self.record_name.clone(),
            zone_id: self.zone_id.clone(),
            address,
            ttl: self.ttl,
        };
        self.dns
            .change_record(RecordAction::Upsert, &record)
            .await
            .map_err(|e| Error::Dns(e.to_string()))?;

        info!(
            record = %record.name,
            zone_id = %record.zone_id,
            address = %record.address,
            ttl = record.ttl,
            "DNS record published"
        );
        Ok(DnsLease { record })
    }

    /// DELETE exactly the record the lease published.
    pub async fn unpublish(&self, lease: &DnsLease) -> Result<()> {
        self.dns
            .change_record(RecordAction::Delete, &lease.record)
            .await
            .map_err(|e| Error::Dns(e.to_string()))?;

        info!(
            record = %lease.record.name,
            address = %lease.record.address,
            "DNS record removed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fleet_instance, MockCompute, MockDns};

    const ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn publisher(compute: MockCompute, dns: Arc<MockDns>) -> NetworkPublisher {
        let resolver = Arc::new(CapacityResolver::new(Arc::new(compute)));
        NetworkPublisher::new(dns, resolver, "mc.example.com", "Z0123", 60)
    }

    fn compute_with(address: Option<Ipv4Addr>) -> MockCompute {
        MockCompute::new().with_instance("ci-1", fleet_instance("i-0abc", "mc-asg", address))
    }

    #[tokio::test]
    async fn test_publish_then_unpublish_leaves_no_record() {
        let dns = Arc::new(MockDns::new());
        let publisher = publisher(compute_with(Some(ADDRESS)), dns.clone());

        let lease = publisher.publish(&FleetId::new("mc-asg")).await.unwrap();
        assert_eq!(lease.address(), ADDRESS);
        assert_eq!(dns.records().len(), 1);
        assert_eq!(dns.records()[0].ttl, 60);

        publisher.unpublish(&lease).await.unwrap();
        assert!(dns.records().is_empty());
    }

    #[tokio::test]
    async fn test_republish_corrects_record() {
        let dns = Arc::new(MockDns::new());
        publisher(compute_with(Some(Ipv4Addr::new(10, 0, 0, 9))), dns.clone())
            .publish(&FleetId::new("mc-asg"))
            .await
            .unwrap();
        publisher(compute_with(Some(ADDRESS)), dns.clone())
            .publish(&FleetId::new("mc-asg"))
            .await
            .unwrap();

        let records = dns.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, ADDRESS);
    }

    #[tokio::test]
    async fn test_unpublish_uses_leased_value_after_address_change() {
        let dns = Arc::new(MockDns::new());
        let lease = publisher(compute_with(Some(ADDRESS)), dns.clone())
            .publish(&FleetId::new("mc-asg"))
            .await
            .unwrap();

        // The instance has since moved; teardown must not depend on it.
        let moved = publisher(compute_with(Some(Ipv4Addr::new(10, 0, 0, 77))), dns.clone());
        moved.unpublish(&lease).await.unwrap();
        assert!(dns.records().is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_public_address_fails() {
        let dns = Arc::new(MockDns::new());
        let err = publisher(compute_with(None), dns.clone())
            .publish(&FleetId::new("mc-asg"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Dns(_)));
        assert!(dns.changes().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_unknown_record_fails() {
        let dns = Arc::new(MockDns::new());
        let publisher = publisher(compute_with(Some(ADDRESS)), dns.clone());
        let lease = publisher.publish(&FleetId::new("mc-asg")).await.unwrap();
        publisher.unpublish(&lease).await.unwrap();

        let err = publisher.unpublish(&lease).await.unwrap_err();
        assert!(matches!(err, Error::Dns(_)));
    }
}

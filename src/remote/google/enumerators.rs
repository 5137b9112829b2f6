//! Google Cloud enumerators
//!
//! Each enumerator maps one repository listing onto stub resources carrying
//! the attributes needed to read them back through the provider.

use super::repository::{ComputeRepository, StorageRepository};
use crate::error::RemoteError;
use crate::remote::Enumerator;
use crate::resource::{extract_short_name, Attributes, Resource, ResourceType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const GOOGLE_STORAGE_BUCKET: &str = "google_storage_bucket";
pub const GOOGLE_COMPUTE_INSTANCE: &str = "google_compute_instance";
pub const GOOGLE_COMPUTE_ATTACHED_DISK: &str = "google_compute_attached_disk";
pub const GOOGLE_COMPUTE_DISK: &str = "google_compute_disk";
pub const GOOGLE_COMPUTE_NETWORK: &str = "google_compute_network";
pub const GOOGLE_COMPUTE_SUBNETWORK: &str = "google_compute_subnetwork";
pub const GOOGLE_COMPUTE_FIREWALL: &str = "google_compute_firewall";

/// Terraform-style id from a self link:
/// `https://www.googleapis.com/compute/v1/projects/p/zones/z/instances/i`
/// -> `projects/p/zones/z/instances/i`
pub fn id_from_self_link(item: &Value) -> Option<String> {
    let link = item.get("selfLink")?.as_str()?;
    let start = link.find("projects/")?;
    Some(link[start..].to_string())
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|v| v.as_str())
}

/// Copy string fields, shortening URL-valued ones
fn attributes(item: &Value, fields: &[&str], url_fields: &[&str]) -> Attributes {
    let mut attrs = Attributes::new();
    for field in fields {
        if let Some(value) = str_field(item, field) {
            attrs.insert(field.to_string(), json!(value));
        }
    }
    for field in url_fields {
        if let Some(value) = str_field(item, field) {
            attrs.insert(field.to_string(), json!(extract_short_name(value)));
        }
    }
    attrs
}

fn stub_from_self_link(
    ty: &str,
    item: &Value,
    fields: &[&str],
    url_fields: &[&str],
) -> Option<Resource> {
    let Some(id) = id_from_self_link(item) else {
        tracing::warn!("Skipping {} without selfLink: {:?}", ty, str_field(item, "name"));
        return None;
    };
    Some(Resource::new(ty, id, attributes(item, fields, url_fields)))
}

pub struct GoogleStorageBucketEnumerator {
    repository: Arc<StorageRepository>,
}

impl GoogleStorageBucketEnumerator {
    pub fn new(repository: Arc<StorageRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleStorageBucketEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_STORAGE_BUCKET)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let buckets = self
            .repository
            .list_all_buckets()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_STORAGE_BUCKET))?;

        Ok(buckets
            .iter()
            .filter_map(|bucket| {
                let name = str_field(bucket, "name")?;
                Some(Resource::new(
                    GOOGLE_STORAGE_BUCKET,
                    name,
                    attributes(bucket, &["name", "location", "storageClass"], &[]),
                ))
            })
            .collect())
    }
}

pub struct GoogleComputeInstanceEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeInstanceEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeInstanceEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_INSTANCE)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let instances = self
            .repository
            .list_all_instances()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_COMPUTE_INSTANCE))?;

        Ok(instances
            .iter()
            .filter_map(|i| {
                stub_from_self_link(
                    GOOGLE_COMPUTE_INSTANCE,
                    i,
                    &["name", "status"],
                    &["zone", "machineType"],
                )
            })
            .collect())
    }
}

/// Non-boot disks attached to instances
pub struct GoogleComputeAttachedDiskEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeAttachedDiskEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeAttachedDiskEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_ATTACHED_DISK)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let instances = self.repository.list_all_instances().await.map_err(|e| {
            RemoteError::listing_with_type(e, GOOGLE_COMPUTE_ATTACHED_DISK, GOOGLE_COMPUTE_INSTANCE)
        })?;

        let mut results = Vec::new();
        for instance in instances.iter() {
            let Some(instance_id) = id_from_self_link(instance) else {
                continue;
            };
            let disks = instance
                .get("disks")
                .and_then(|d| d.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default();

            for disk in disks {
                if disk.get("boot").and_then(|b| b.as_bool()).unwrap_or(false) {
                    continue;
                }
                let Some(source) = str_field(disk, "source") else {
                    continue;
                };
                let disk_name = extract_short_name(source);

                let mut attrs = Attributes::new();
                attrs.insert("instance".to_string(), json!(instance_id));
                attrs.insert("disk".to_string(), json!(disk_name));
                if let Some(device) = str_field(disk, "deviceName") {
                    attrs.insert("device_name".to_string(), json!(device));
                }
                if let Some(zone) = str_field(instance, "zone") {
                    attrs.insert("zone".to_string(), json!(extract_short_name(zone)));
                }

                results.push(Resource::new(
                    GOOGLE_COMPUTE_ATTACHED_DISK,
                    format!("{}/{}", instance_id, disk_name),
                    attrs,
                ));
            }
        }
        Ok(results)
    }
}

pub struct GoogleComputeDiskEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeDiskEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeDiskEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_DISK)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let disks = self
            .repository
            .list_all_disks()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_COMPUTE_DISK))?;

        Ok(disks
            .iter()
            .filter_map(|d| {
                stub_from_self_link(GOOGLE_COMPUTE_DISK, d, &["name", "sizeGb"], &["zone", "type"])
            })
            .collect())
    }
}

pub struct GoogleComputeNetworkEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeNetworkEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeNetworkEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_NETWORK)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let networks = self
            .repository
            .list_all_networks()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_COMPUTE_NETWORK))?;

        Ok(networks
            .iter()
            .filter_map(|n| stub_from_self_link(GOOGLE_COMPUTE_NETWORK, n, &["name"], &[]))
            .collect())
    }
}

pub struct GoogleComputeSubnetworkEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeSubnetworkEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeSubnetworkEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_SUBNETWORK)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let subnetworks = self
            .repository
            .list_all_subnetworks()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_COMPUTE_SUBNETWORK))?;

        Ok(subnetworks
            .iter()
            .filter_map(|s| {
                stub_from_self_link(
                    GOOGLE_COMPUTE_SUBNETWORK,
                    s,
                    &["name", "ipCidrRange"],
                    &["region", "network"],
                )
            })
            .collect())
    }
}

pub struct GoogleComputeFirewallEnumerator {
    repository: Arc<ComputeRepository>,
}

impl GoogleComputeFirewallEnumerator {
    pub fn new(repository: Arc<ComputeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Enumerator for GoogleComputeFirewallEnumerator {
    fn supported_type(&self) -> ResourceType {
        ResourceType::new(GOOGLE_COMPUTE_FIREWALL)
    }

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
        let firewalls = self
            .repository
            .list_all_firewalls()
            .await
            .map_err(|e| RemoteError::listing(e, GOOGLE_COMPUTE_FIREWALL))?;

        Ok(firewalls
            .iter()
            .filter_map(|f| {
                stub_from_self_link(
                    GOOGLE_COMPUTE_FIREWALL,
                    f,
                    &["name", "direction"],
                    &["network"],
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_self_link() {
        let item = json!({
            "selfLink": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/instances/vm-1"
        });
        assert_eq!(
            id_from_self_link(&item).as_deref(),
            Some("projects/p/zones/us-central1-a/instances/vm-1")
        );
        assert!(id_from_self_link(&json!({"name": "x"})).is_none());
    }

    #[test]
    fn test_attributes_shorten_urls() {
        let item = json!({
            "name": "subnet-1",
            "region": "https://www.googleapis.com/compute/v1/projects/p/regions/europe-west1",
            "ignored": "x"
        });
        let attrs = attributes(&item, &["name"], &["region"]);
        assert_eq!(attrs["name"], "subnet-1");
        assert_eq!(attrs["region"], "europe-west1");
        assert!(!attrs.contains_key("ignored"));
    }
}

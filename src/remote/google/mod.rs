//! Google Cloud remote (`gcp+tf`)
//!
//! - [`repository`] - Cached, paginated Storage and Compute listings
//! - [`enumerators`] - One enumerator per supported resource type

pub mod enumerators;
pub mod repository;

use crate::gcp::GcpClient;
use crate::progress::ProgressCounter;
use crate::remote::{Cache, GenericDetailsFetcher, RemoteLibrary};
use crate::resource::{Deserializer, Resource};
use crate::terraform::{
    ProcessLauncher, ProviderConfig, ProviderInstaller, ResourceReader, TerraformProvider,
    TerraformProviderConfig,
};
use enumerators::*;
use repository::{ComputeRepository, StorageRepository};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const REMOTE_NAME: &str = "gcp+tf";
pub const PROVIDER_KEY: &str = "google";
pub const DEFAULT_PROVIDER_VERSION: &str = "3.78.0";

/// Register the Google enumerators, plus details fetchers when a reader is given
pub fn init(
    library: &mut RemoteLibrary,
    client: GcpClient,
    cache: Arc<Cache>,
    reader: Option<Arc<dyn ResourceReader>>,
) {
    let storage = Arc::new(StorageRepository::new(client.clone(), cache.clone()));
    let compute = Arc::new(ComputeRepository::new(client, cache));

    library.add_enumerator(Arc::new(GoogleStorageBucketEnumerator::new(storage)));
    library.add_enumerator(Arc::new(GoogleComputeInstanceEnumerator::new(compute.clone())));
    library.add_enumerator(Arc::new(GoogleComputeAttachedDiskEnumerator::new(compute.clone())));
    library.add_enumerator(Arc::new(GoogleComputeDiskEnumerator::new(compute.clone())));
    library.add_enumerator(Arc::new(GoogleComputeNetworkEnumerator::new(compute.clone())));
    library.add_enumerator(Arc::new(GoogleComputeSubnetworkEnumerator::new(compute.clone())));
    library.add_enumerator(Arc::new(GoogleComputeFirewallEnumerator::new(compute)));

    let Some(reader) = reader else {
        return;
    };

    for ty in [
        GOOGLE_STORAGE_BUCKET,
        GOOGLE_COMPUTE_INSTANCE,
        GOOGLE_COMPUTE_ATTACHED_DISK,
        GOOGLE_COMPUTE_DISK,
        GOOGLE_COMPUTE_NETWORK,
        GOOGLE_COMPUTE_FIREWALL,
    ] {
        library.add_details_fetcher(
            ty,
            Arc::new(GenericDetailsFetcher::new(ty, reader.clone(), Deserializer::new())),
        );
    }

    // Subnetworks are regional, read them through their region's plugin
    let subnetworks =
        GenericDetailsFetcher::new(GOOGLE_COMPUTE_SUBNETWORK, reader, Deserializer::new())
            .with_read_attributes(Arc::new(|res: &Resource| {
            let mut attrs = HashMap::new();
            if let Some(region) = res.get_string("region") {
                attrs.insert("alias".to_string(), region.to_string());
            }
            attrs
        }));
    library.add_details_fetcher(GOOGLE_COMPUTE_SUBNETWORK, Arc::new(subnetworks));
}

/// Provider bridge for the Google plugin, one alias per region
pub fn terraform_provider(
    project: &str,
    region: &str,
    version: &str,
    config_dir: &Path,
    progress: Arc<dyn ProgressCounter>,
) -> TerraformProvider {
    let installer = ProviderInstaller::new(ProviderConfig::new(PROVIDER_KEY, version, config_dir));
    let project = project.to_string();

    let config = TerraformProviderConfig {
        name: PROVIDER_KEY.to_string(),
        default_alias: region.to_string(),
        get_provider_config: Some(Arc::new(move |alias: &str| {
            json!({
                "project": project,
                "region": alias,
            })
        })),
    };

    TerraformProvider::new(config, Arc::new(installer), Arc::new(ProcessLauncher), progress)
}

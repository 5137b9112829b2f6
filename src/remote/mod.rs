//! Remote resource acquisition
//!
//! - [`cache`] - Single-flight memo shared by repositories
//! - [`parallel`] - Bounded-concurrency runner
//! - [`scanner`] - Drives enumerators and details fetchers
//! - [`details`] - Details fetching through the provider bridge
//! - [`google`] - Google Cloud enumerators

pub mod cache;
pub mod details;
pub mod google;
pub mod parallel;
pub mod scanner;

use crate::error::RemoteError;
use crate::resource::{Resource, ResourceType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use cache::Cache;
pub use details::GenericDetailsFetcher;
pub use parallel::ParallelRunner;
pub use scanner::{Scanner, ScannerOptions};

/// Produces the inventory of one resource type
#[async_trait]
pub trait Enumerator: Send + Sync {
    fn supported_type(&self) -> ResourceType;

    async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError>;
}

/// Replaces an enumerated stub by its fully attributed resource
#[async_trait]
pub trait DetailsFetcher: Send + Sync {
    /// `None` when the resource disappeared since it was enumerated
    async fn read_details(&self, resource: &Resource) -> Result<Option<Resource>, RemoteError>;
}

/// Registered enumerators and details fetchers
#[derive(Default)]
pub struct RemoteLibrary {
    enumerators: Vec<Arc<dyn Enumerator>>,
    details_fetchers: HashMap<ResourceType, Arc<dyn DetailsFetcher>>,
}

impl RemoteLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_enumerator(&mut self, enumerator: Arc<dyn Enumerator>) {
        self.enumerators.push(enumerator);
    }

    pub fn add_details_fetcher(
        &mut self,
        resource_type: impl Into<ResourceType>,
        fetcher: Arc<dyn DetailsFetcher>,
    ) {
        self.details_fetchers.insert(resource_type.into(), fetcher);
    }

    pub fn enumerators(&self) -> &[Arc<dyn Enumerator>] {
        &self.enumerators
    }

    pub fn details_fetcher(&self, resource_type: &ResourceType) -> Option<Arc<dyn DetailsFetcher>> {
        self.details_fetchers.get(resource_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<ResourceType> {
        self.enumerators.iter().map(|e| e.supported_type()).collect()
    }
}

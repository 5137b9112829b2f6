use super::DetailsFetcher;
use crate::error::RemoteError;
use crate::resource::{Deserializer, Resource, ResourceType};
use crate::terraform::{ReadResourceArgs, ResourceReader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the flat read attributes of a stub, e.g. an `alias` override
pub type ReadAttributesFn = Arc<dyn Fn(&Resource) -> HashMap<String, String> + Send + Sync>;

/// Reads a resource through a [`ResourceReader`] and deserializes its state
pub struct GenericDetailsFetcher {
    resource_type: ResourceType,
    reader: Arc<dyn ResourceReader>,
    deserializer: Deserializer,
    read_attributes: Option<ReadAttributesFn>,
}

impl GenericDetailsFetcher {
    pub fn new(
        resource_type: impl Into<ResourceType>,
        reader: Arc<dyn ResourceReader>,
        deserializer: Deserializer,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            reader,
            deserializer,
            read_attributes: None,
        }
    }

    pub fn with_read_attributes(mut self, read_attributes: ReadAttributesFn) -> Self {
        self.read_attributes = Some(read_attributes);
        self
    }
}

#[async_trait]
impl DetailsFetcher for GenericDetailsFetcher {
    async fn read_details(&self, resource: &Resource) -> Result<Option<Resource>, RemoteError> {
        let mut args = ReadResourceArgs::new(self.resource_type.clone(), resource.id.clone());
        if let Some(read_attributes) = &self.read_attributes {
            args.attributes = read_attributes(resource);
        }

        let state = self
            .reader
            .read_resource(&args)
            .await
            .map_err(|e| {
                RemoteError::scanning(e, self.resource_type.clone(), resource.id.clone())
            })?;

        let Some(state) = state else {
            tracing::debug!("{} {} no longer exists", self.resource_type, resource.id);
            return Ok(None);
        };

        Ok(self
            .deserializer
            .deserialize_one(&self.resource_type, &resource.id, &state))
    }
}

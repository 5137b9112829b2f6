//! Terraform provider bridge
//!
//! Reads the full state of cloud resources through external provider
//! plugins.
//!
//! - [`schema`] - Attribute types and resource schemas
//! - [`value`] - Typed values and flat attribute conversion
//! - [`msgpack`] - msgpack encoding of typed values
//! - [`plugin`] - Plugin client interface and diagnostics
//! - [`grpc`] - go-plugin gRPC client speaking tfplugin5
//! - [`installer`] - Locates or downloads provider binaries
//! - [`provider`] - Per-alias plugin lifecycle and resource reads

pub mod error;
pub mod grpc;
pub mod installer;
pub mod msgpack;
pub mod plugin;
pub mod provider;
pub mod schema;
pub mod tfplugin5;
pub mod value;

use crate::resource::ResourceType;
use async_trait::async_trait;
use std::collections::HashMap;

pub use error::ProviderError;
pub use grpc::GrpcPluginClient;
pub use installer::{Installer, ProviderConfig, ProviderInstaller};
pub use plugin::{PluginLauncher, ProcessLauncher, ProviderClient};
pub use provider::{InitOutcome, TerraformProvider, TerraformProviderConfig, EXIT_ERROR};
pub use schema::{AttrType, ProviderSchema};
pub use value::{TypedValue, UNKNOWN_VARIABLE_VALUE};

/// One resource read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResourceArgs {
    pub ty: ResourceType,
    pub id: String,
    /// Flat attributes identifying the resource. `alias` selects the plugin.
    pub attributes: HashMap<String, String>,
}

impl ReadResourceArgs {
    pub fn new(ty: impl Into<ResourceType>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Reads full resource state
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read_resource(
        &self,
        args: &ReadResourceArgs,
    ) -> Result<Option<TypedValue>, ProviderError>;
}

//! Plugin client
//!
//! A provider plugin is an external process. The bridge only talks to it
//! through [`ProviderClient`]; [`GrpcPluginClient`] is the production
//! implementation, speaking tfplugin5 over a go-plugin gRPC connection.

use super::error::{ProviderError, Result};
use super::grpc::GrpcPluginClient;
use super::schema::{AttrType, ProviderSchema};
use super::value::TypedValue;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(&self.summary)
        } else {
            write!(f, "{}: {}", self.summary, self.detail)
        }
    }
}

/// Diagnostics attached to a plugin response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    /// Error diagnostics as a single error
    pub fn err(&self) -> Option<ProviderError> {
        let errors: Vec<Diagnostic> = self
            .0
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .cloned()
            .collect();
        (!errors.is_empty()).then(|| ProviderError::Diagnostics(Diagnostics(errors)))
    }

    /// Warnings joined in one message
    pub fn non_fatal_err(&self) -> Option<String> {
        let warnings: Vec<String> = self
            .0
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .map(|d| d.to_string())
            .collect();
        (!warnings.is_empty()).then(|| warnings.join("; "))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Read of one resource. `state_type` types both the prior and new state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResourceRequest {
    pub type_name: String,
    pub state_type: AttrType,
    pub prior_state: TypedValue,
    pub private: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResourceResponse {
    pub new_state: TypedValue,
    pub diagnostics: Diagnostics,
    pub private: Vec<u8>,
}

/// Narrow capability interface over one running plugin
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_schema(&self) -> Result<ProviderSchema>;

    /// Configure the plugin; `ty` is the implied type of the provider block
    async fn configure(&self, config: &TypedValue, ty: &AttrType) -> Result<Diagnostics>;

    async fn read_resource(&self, request: &ReadResourceRequest) -> Result<ReadResourceResponse>;

    /// Stop the plugin. Calls after the first are no-ops.
    async fn close(&self);
}

/// Starts a plugin binary and returns a handshaken client
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    async fn launch(&self, path: &Path) -> Result<Arc<dyn ProviderClient>>;
}

/// Launches [`GrpcPluginClient`]s
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait]
impl PluginLauncher for ProcessLauncher {
    async fn launch(&self, path: &Path) -> Result<Arc<dyn ProviderClient>> {
        let client = GrpcPluginClient::start(path).await?;
        Ok(Arc::new(client))
    }
}

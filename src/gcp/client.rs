//! GCP Client
//!
//! Combines a token source with the HTTP wrapper and builds API URLs.

use super::auth::{GcpCredentials, TokenSource};
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;

pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";
pub const STORAGE_BASE_URL: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Clone)]
pub struct GcpClient {
    token_source: Arc<dyn TokenSource>,
    http: GcpHttpClient,
    pub project_id: String,
    compute_base: String,
    storage_base: String,
}

impl GcpClient {
    /// Client authenticated with Application Default Credentials
    pub async fn new(project_id: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;
        Self::with_token_source(project_id, Arc::new(credentials))
    }

    pub fn with_token_source(project_id: &str, token_source: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Self {
            token_source,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            compute_base: COMPUTE_BASE_URL.to_string(),
            storage_base: STORAGE_BASE_URL.to_string(),
        })
    }

    /// Point both APIs at another host, e.g. a mock server
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.compute_base = format!("{}/compute/v1", base);
        self.storage_base = format!("{}/storage/v1", base);
        self
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.token_source.token().await?;
        self.http.get(url, &token).await
    }

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.compute_base, self.project_id, path)
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all zones or regions)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    /// Build Cloud Storage API URL
    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/{}", self.storage_base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::auth::StaticToken;

    #[test]
    fn test_url_builders() {
        let client =
            GcpClient::with_token_source("my-project", Arc::new(StaticToken("t".into()))).unwrap();
        assert_eq!(
            client.compute_aggregated_url("instances"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/aggregated/instances"
        );
        assert_eq!(
            client.compute_global_url("networks"),
            "https://compute.googleapis.com/compute/v1/projects/my-project/global/networks"
        );
        assert_eq!(client.storage_url("b"), "https://storage.googleapis.com/storage/v1/b");

        let mocked = client.with_base_url("http://127.0.0.1:9999/");
        assert_eq!(
            mocked.compute_global_url("firewalls"),
            "http://127.0.0.1:9999/compute/v1/projects/my-project/global/firewalls"
        );
    }
}

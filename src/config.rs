//! Configuration Management
//!
//! Persistent scan settings stored as JSON in the user's config directory.
//! Command line flags override the file; environment variables and the
//! gcloud configuration fill in what both leave unset.

use crate::gcp::auth;
use crate::remote::google::DEFAULT_PROVIDER_VERSION;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_REGION: &str = "us-central1";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Pinned Google provider version
    #[serde(default)]
    pub provider_version: Option<String>,
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Resource type patterns to leave out of the scan
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub deep: bool,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remotescan").join("config.json"))
    }

    /// Load from the default location, defaults when missing or unreadable
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Unable to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Project to scan (config > environment > gcloud default)
    pub fn effective_project(&self) -> Result<String> {
        if let Some(project) = &self.project_id {
            anyhow::ensure!(auth::validate_project_id(project), "Invalid project ID: {}", project);
            return Ok(project.clone());
        }
        auth::get_default_project()
            .context("No GCP project set. Use --project or set GOOGLE_CLOUD_PROJECT")
    }

    /// Region used as the default provider alias
    pub fn effective_region(&self) -> String {
        self.region
            .clone()
            .or_else(auth::get_default_region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    pub fn provider_version(&self) -> &str {
        self.provider_version
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER_VERSION)
    }
}

//! Provider installer
//!
//! Providers live under `<config dir>/.remotescan/plugins/<os>_<arch>/` and
//! are downloaded as a `.zip` release archive from the registry the first
//! time they are needed.

use super::error::{ProviderError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGISTRY_URL: &str = "https://releases.hashicorp.com";

/// Resolves the path of an executable provider binary, installing it if needed
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self) -> Result<PathBuf>;
}

/// Which provider to install and where
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider key, e.g. `google`
    pub key: String,
    pub version: String,
    /// Base directory under which `.remotescan/plugins` is created
    pub config_dir: PathBuf,
    pub registry_url: String,
}

impl ProviderConfig {
    pub fn new(
        key: impl Into<String>,
        version: impl Into<String>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
            config_dir: config_dir.into(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
        }
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// e.g. `terraform-provider-google_v3.78.0`
    pub fn binary_name(&self) -> String {
        format!("terraform-provider-{}_v{}", self.key, self.version)
    }

    pub fn download_url(&self) -> String {
        format!(
            "{registry}/terraform-provider-{key}/{version}/\
             terraform-provider-{key}_{version}_{os}_{arch}.zip",
            registry = self.registry_url,
            key = self.key,
            version = self.version,
            os = go_os(),
            arch = go_arch(),
        )
    }
}

/// OS name as used in provider release archives
pub fn go_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture name as used in provider release archives
pub fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

pub struct ProviderInstaller {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl ProviderInstaller {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn provider_directory(&self) -> PathBuf {
        self.config
            .config_dir
            .join(".remotescan")
            .join("plugins")
            .join(format!("{}_{}", go_os(), go_arch()))
    }

    /// Path of the installed binary. Release archives sometimes add a postfix
    /// to the binary name (`_x5`), so any file starting with the expected
    /// name is accepted.
    fn binary_path(&self, dir: &Path) -> PathBuf {
        let name = self.config.binary_name();
        let exact = dir.join(&name);
        if exact.exists() {
            return exact;
        }

        std::fs::read_dir(dir)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file())
                    .find(|path| {
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with(&name))
                    })
            })
            .unwrap_or(exact)
    }

    async fn download(&self, dir: &Path) -> Result<()> {
        let url = self.config.download_url();
        tracing::info!("Downloading provider {} from {}", self.config.binary_name(), url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            tracing::error!("Provider archive not available: {} ({})", url, status);
            return Err(ProviderError::NotFound {
                version: self.config.version.clone(),
            });
        }
        let bytes = response.error_for_status()?.bytes().await?;

        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || unpack(&bytes, &dir))
            .await
            .map_err(|e| ProviderError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

#[async_trait]
impl Installer for ProviderInstaller {
    async fn install(&self) -> Result<PathBuf> {
        let dir = self.provider_directory();
        let path = self.binary_path(&dir);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => return Err(ProviderError::InstallPath(path)),
            Ok(_) => {
                tracing::debug!("Found existing provider {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!("Provider not found in {}, downloading", dir.display());
        self.download(&dir).await?;

        let path = self.binary_path(&dir);
        if !path.is_file() {
            return Err(ProviderError::NotFound {
                version: self.config.version.clone(),
            });
        }
        Ok(path)
    }
}

fn unpack(archive: &[u8], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(archive))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name().map(|p| p.to_path_buf()) else {
            tracing::warn!("Skipping archive entry outside of {}: {}", dir.display(), file.name());
            continue;
        };
        let target = dir.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

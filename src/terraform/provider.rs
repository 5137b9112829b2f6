//! Provider bridge
//!
//! Owns every running plugin of one provider, one per alias (typically a
//! region or project). Plugins are installed, started and configured lazily
//! on first use of their alias, and all of them are stopped by [`cleanup`].
//!
//! [`cleanup`]: TerraformProvider::cleanup

use super::error::{ProviderError, Result};
use super::installer::Installer;
use super::plugin::{PluginLauncher, ProviderClient, ReadResourceRequest};
use super::schema::{AttrType, ProviderSchema};
use super::value::TypedValue;
use super::{ReadResourceArgs, ResourceReader};
use crate::progress::ProgressCounter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Process exit code used when interrupted during provider initialization
pub const EXIT_ERROR: i32 = 3;

/// How [`TerraformProvider::init_until`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Ready,
    /// Interrupted before the default alias was configured. Every started
    /// plugin has been closed.
    Interrupted,
}

/// Builds the provider configuration object for an alias
pub type ProviderConfigFn = Arc<dyn Fn(&str) -> serde_json::Value + Send + Sync>;

#[derive(Clone)]
pub struct TerraformProviderConfig {
    pub name: String,
    pub default_alias: String,
    pub get_provider_config: Option<ProviderConfigFn>,
}

impl std::fmt::Debug for TerraformProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformProviderConfig")
            .field("name", &self.name)
            .field("default_alias", &self.default_alias)
            .field("get_provider_config", &self.get_provider_config.is_some())
            .finish()
    }
}

/// Retry policy for the read step
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

type ClientSlot = Arc<OnceCell<Arc<dyn ProviderClient>>>;

pub struct TerraformProvider {
    config: TerraformProviderConfig,
    installer: Arc<dyn Installer>,
    launcher: Arc<dyn PluginLauncher>,
    progress: Arc<dyn ProgressCounter>,
    retry: RetryPolicy,
    install_path: OnceCell<PathBuf>,
    schema: OnceCell<Arc<ProviderSchema>>,
    aliases: Mutex<HashMap<String, ClientSlot>>,
    started: Mutex<Vec<(String, Arc<dyn ProviderClient>)>>,
}

impl TerraformProvider {
    pub fn new(
        config: TerraformProviderConfig,
        installer: Arc<dyn Installer>,
        launcher: Arc<dyn PluginLauncher>,
        progress: Arc<dyn ProgressCounter>,
    ) -> Self {
        Self {
            config,
            installer,
            launcher,
            progress,
            retry: RetryPolicy::default(),
            install_path: OnceCell::new(),
            schema: OnceCell::new(),
            aliases: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Resource type schemas, once the first alias has been configured
    pub fn schema(&self) -> Option<Arc<ProviderSchema>> {
        self.schema.get().cloned()
    }

    /// Start and configure the default alias.
    ///
    /// An interrupt received meanwhile stops every started plugin and exits
    /// the process with [`EXIT_ERROR`].
    pub async fn init(&self) -> Result<()> {
        match self.init_until(crate::signal::interrupted()).await? {
            InitOutcome::Ready => Ok(()),
            InitOutcome::Interrupted => std::process::exit(EXIT_ERROR),
        }
    }

    /// Start and configure the default alias unless `interrupt` resolves
    /// first, in which case every started plugin is stopped.
    pub async fn init_until(&self, interrupt: impl Future<Output = ()>) -> Result<InitOutcome> {
        let alias = self.config.default_alias.clone();
        tokio::select! {
            res = self.client(&alias) => res.map(|_| InitOutcome::Ready),
            _ = interrupt => {
                tracing::warn!(
                    "Detected interrupt during {} provider configuration, cleaning up",
                    self.config.name
                );
                self.cleanup().await;
                Ok(InitOutcome::Interrupted)
            }
        }
    }

    /// Typed provider configuration for an alias, null when the provider has
    /// no configuration function.
    pub fn serialize_config(&self, alias: &str) -> Result<TypedValue> {
        let Some(get_config) = &self.config.get_provider_config else {
            return Ok(TypedValue::Null);
        };
        let schema = self
            .schema
            .get()
            .ok_or_else(|| ProviderError::Protocol("provider schema not loaded".to_string()))?;

        let raw = get_config(alias);
        Ok(TypedValue::from_json(&raw, &schema.provider.block.implied_type())?)
    }

    /// Read the full state of one resource.
    ///
    /// `args` is left untouched. An `alias` attribute selects the plugin and is
    /// not forwarded; the prior state is built from the remaining flat
    /// attributes plus the id. Returns `None` when the resource no longer exists.
    pub async fn read_resource(&self, args: &ReadResourceArgs) -> Result<Option<TypedValue>> {
        tracing::debug!(
            "Reading resource {} {} with attributes {:?}",
            args.ty,
            args.id,
            args.attributes
        );

        let mut attributes = args.attributes.clone();
        let alias = attributes
            .remove("alias")
            .filter(|alias| !alias.is_empty())
            .unwrap_or_else(|| self.config.default_alias.clone());

        let client = self.client(&alias).await?;
        let schema = self
            .schema
            .get()
            .ok_or_else(|| ProviderError::Protocol("provider schema not loaded".to_string()))?;
        let resource_schema = schema
            .resource(args.ty.as_str())
            .ok_or_else(|| ProviderError::UnknownResourceType(args.ty.to_string()))?;
        let implied = resource_schema.block.implied_type();

        attributes.insert("id".to_string(), args.id.clone());
        let prior_state = TypedValue::from_flatmap(&attributes, &implied)?;
        let request = ReadResourceRequest {
            type_name: args.ty.to_string(),
            state_type: implied,
            prior_state,
            private: Vec::new(),
        };

        let mut attempt = 1;
        let state = loop {
            match self.read_once(client.as_ref(), &request).await {
                Ok(state) => break state,
                Err(err) if attempt < self.retry.attempts => {
                    tracing::debug!(
                        "Read of {} {} failed (attempt {}): {}",
                        args.ty,
                        args.id,
                        attempt,
                        err
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        self.progress.inc();
        Ok(state)
    }

    async fn read_once(
        &self,
        client: &dyn ProviderClient,
        request: &ReadResourceRequest,
    ) -> Result<Option<TypedValue>> {
        let response = client.read_resource(request).await?;
        if let Some(err) = response.diagnostics.err() {
            return Err(err);
        }

        if response.new_state.is_null() {
            if let Some(warning) = response.diagnostics.non_fatal_err() {
                return Err(ProviderError::NullState(warning));
            }
            return Ok(None);
        }

        Ok(Some(response.new_state))
    }

    /// Stop every plugin started so far
    pub async fn cleanup(&self) {
        let started: Vec<_> = self
            .started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for (alias, client) in started {
            tracing::debug!("Closing {} provider client for alias {}", self.config.name, alias);
            client.close().await;
        }
    }

    async fn client(&self, alias: &str) -> Result<Arc<dyn ProviderClient>> {
        let slot = {
            let mut aliases = self
                .aliases
                .lock()
                .map_err(|_| ProviderError::Protocol("alias table poisoned".to_string()))?;
            aliases.entry(alias.to_string()).or_default().clone()
        };

        slot.get_or_try_init(|| self.start_client(alias))
            .await
            .cloned()
    }

    async fn start_client(&self, alias: &str) -> Result<Arc<dyn ProviderClient>> {
        let path = self
            .install_path
            .get_or_try_init(|| self.installer.install())
            .await?
            .clone();

        tracing::debug!("Starting {} provider client for alias {}", self.config.name, alias);
        let client = self.launcher.launch(&path).await?;
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((alias.to_string(), client.clone()));

        if let Err(err) = self.configure(alias, client.as_ref()).await {
            tracing::warn!(
                "Unable to configure {} provider for alias {}: {}",
                self.config.name,
                alias,
                err
            );
            self.release(&client).await;
            return Err(err);
        }

        tracing::debug!("{} provider configured for alias {}", self.config.name, alias);
        Ok(client)
    }

    async fn configure(&self, alias: &str, client: &dyn ProviderClient) -> Result<()> {
        let schema = self
            .schema
            .get_or_try_init(|| async { client.get_schema().await.map(Arc::new) })
            .await?;

        let config = self.serialize_config(alias)?;
        let config_type: AttrType = schema.provider.block.implied_type();
        let diagnostics = client.configure(&config, &config_type).await?;
        match diagnostics.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn release(&self, client: &Arc<dyn ProviderClient>) {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(_, c)| !Arc::ptr_eq(c, client));
        client.close().await;
    }
}

#[async_trait]
impl ResourceReader for TerraformProvider {
    async fn read_resource(&self, args: &ReadResourceArgs) -> Result<Option<TypedValue>> {
        TerraformProvider::read_resource(self, args).await
    }
}

//! Alerts
//!
//! Recoverable remote failures (mostly missing permissions) are reported as
//! [`Alert`]s through an injected [`AlertSink`] instead of aborting the scan.

use crate::error::RemoteError;
use crate::resource::ResourceType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

/// Which step of the scan raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanningPhase {
    Enumeration,
    DetailsFetching,
}

impl fmt::Display for ScanningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enumeration => f.write_str("enumeration"),
            Self::DetailsFetching => f.write_str("details fetching"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub resource_type: ResourceType,
    pub provider: String,
    pub phase: ScanningPhase,
    pub message: String,
    /// The resource type must be left out of drift calculation
    pub should_ignore_resource: bool,
}

impl Alert {
    /// Alert for an access-denied listing or details error
    pub fn remote_access_denied(err: &RemoteError, phase: ScanningPhase) -> Self {
        let resource_type = err.resource_type().clone();
        let cause = err.root_cause().to_string();
        let message = match phase {
            ScanningPhase::Enumeration => format!(
                "Ignoring {} from drift calculation: Listing {} is forbidden: {}",
                resource_type,
                err.listed_type(),
                cause
            ),
            ScanningPhase::DetailsFetching => format!(
                "Ignoring {} from drift calculation: Reading details of {} is forbidden: {}",
                resource_type, resource_type, cause
            ),
        };

        Self {
            provider: provider_for(&resource_type).to_string(),
            resource_type,
            phase,
            message,
            should_ignore_resource: true,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Remote name owning a resource type
pub fn provider_for(resource_type: &ResourceType) -> &'static str {
    let ty = resource_type.as_str();
    if ty.starts_with("google_") {
        "gcp+tf"
    } else if ty.starts_with("aws_") {
        "aws+tf"
    } else if ty.starts_with("azurerm_") {
        "azure+tf"
    } else if ty.starts_with("github_") {
        "github+tf"
    } else {
        "unknown"
    }
}

/// Fire-and-forget destination for alerts
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, key: &str, alert: Alert);
}

/// Collects alerts by key
#[derive(Debug, Default)]
pub struct Alerter {
    alerts: Mutex<BTreeMap<String, Vec<Alert>>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> BTreeMap<String, Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().map(|a| a.is_empty()).unwrap_or(true)
    }

    /// Resource types to leave out of drift calculation
    pub fn ignored_types(&self) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter(|(_, alerts)| alerts.iter().any(|a| a.should_ignore_resource))
            .map(|(key, _)| key)
            .collect()
    }
}

impl AlertSink for Alerter {
    fn send_alert(&self, key: &str, alert: Alert) {
        tracing::warn!("{}", alert.message);
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        alerts.entry(key.to_string()).or_default().push(alert);
    }
}

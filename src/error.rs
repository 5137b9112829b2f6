//! Error types
//!
//! Remote errors carry the resource type they were raised for so the scanner
//! can decide between alerting and aborting.

use crate::resource::ResourceType;
use thiserror::Error;

/// Error returned by an upstream cloud API that answered with a non-success status
#[derive(Error, Debug, Clone)]
#[error("API request failed: {status} {message}")]
pub struct RemoteApiError {
    pub status: u16,
    pub message: String,
}

impl RemoteApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 401 and 403 both mean the credentials cannot list this type
    pub fn is_access_denied(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Failure while acquiring remote resources
#[derive(Error, Debug)]
pub enum RemoteError {
    /// An enumerator's upstream listing failed. `listed_type` names the type
    /// whose listing actually failed, which is a prerequisite type when an
    /// enumerator needs another listing first.
    #[error("error listing {listed_type}: {source}")]
    Listing {
        resource_type: ResourceType,
        listed_type: ResourceType,
        #[source]
        source: anyhow::Error,
    },

    /// Fetching details of an already enumerated resource failed
    #[error("error scanning {resource_type} {id}: {source}")]
    Scanning {
        resource_type: ResourceType,
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RemoteError {
    pub fn listing(
        source: impl Into<anyhow::Error>,
        resource_type: impl Into<ResourceType>,
    ) -> Self {
        let resource_type = resource_type.into();
        Self::Listing {
            listed_type: resource_type.clone(),
            resource_type,
            source: source.into(),
        }
    }

    pub fn listing_with_type(
        source: impl Into<anyhow::Error>,
        resource_type: impl Into<ResourceType>,
        listed_type: impl Into<ResourceType>,
    ) -> Self {
        Self::Listing {
            resource_type: resource_type.into(),
            listed_type: listed_type.into(),
            source: source.into(),
        }
    }

    pub fn scanning(
        source: impl Into<anyhow::Error>,
        resource_type: impl Into<ResourceType>,
        id: impl Into<String>,
    ) -> Self {
        Self::Scanning {
            resource_type: resource_type.into(),
            id: id.into(),
            source: source.into(),
        }
    }

    pub fn resource_type(&self) -> &ResourceType {
        match self {
            Self::Listing { resource_type, .. } | Self::Scanning { resource_type, .. } => {
                resource_type
            }
        }
    }

    /// Type whose listing or reading failed
    pub fn listed_type(&self) -> &ResourceType {
        match self {
            Self::Listing { listed_type, .. } => listed_type,
            Self::Scanning { resource_type, .. } => resource_type,
        }
    }

    /// Innermost error of the chain
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Self::Listing { source, .. } | Self::Scanning { source, .. } => source.root_cause(),
        }
    }

    /// Whether this failure is a permission problem rather than a real outage
    pub fn is_access_denied(&self) -> bool {
        let source = match self {
            Self::Listing { source, .. } | Self::Scanning { source, .. } => source,
        };

        source.chain().any(|cause| {
            if let Some(api) = cause.downcast_ref::<RemoteApiError>() {
                return api.is_access_denied();
            }
            let message = cause.to_string();
            message.contains("AccessDenied")
                || message.contains("Error 403")
                || message.contains("PermissionDenied")
                || message.contains("status code: 403")
        })
    }
}

/// Fault inside the worker pool itself, fatal for the whole scan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("a runner routine panicked: {0}")]
    Panic(String),

    #[error("scan cancelled")]
    Cancelled,
}

/// Error returned by [`crate::remote::scanner::Scanner::resources`]
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

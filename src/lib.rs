//! remotescan
//!
//! Enumerates live cloud resources concurrently and, in deep mode, reads
//! their full state through Terraform provider plugins.
//!
//! - [`remote`] - Scanner, parallel runner, cache and the Google remote
//! - [`terraform`] - Provider plugin bridge
//! - [`resource`] - Generic resource model
//! - [`alerter`] / [`filter`] - Alert sink and resource type filter

pub mod alerter;
pub mod config;
pub mod error;
pub mod filter;
pub mod gcp;
pub mod progress;
pub mod remote;
pub mod resource;
pub mod signal;
pub mod terraform;

pub use alerter::{Alert, AlertSink, Alerter, ScanningPhase};
pub use error::{RemoteApiError, RemoteError, RunnerError, ScanError};
pub use filter::{Filter, TypeFilter};
pub use resource::{Resource, ResourceType};

/// Version injected at compile time via REMOTESCAN_VERSION (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("REMOTESCAN_VERSION") {
    Some(v) => v,
    None => "dev",
};

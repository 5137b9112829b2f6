//! Provider bridge error types

use super::plugin::Diagnostics;
use super::value::ConversionError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider binary not found for version {version}")]
    NotFound { version: String },

    #[error("found directory instead of provider binary in {}", .0.display())]
    InstallPath(PathBuf),

    #[error("failed to download provider: {0}")]
    Download(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid provider archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    #[error("plugin protocol error: {0}")]
    Protocol(String),

    #[error("plugin connection failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("plugin call failed ({:?}): {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),

    #[error("{0}")]
    Diagnostics(Diagnostics),

    #[error("invalid value: {0}")]
    Conversion(#[from] ConversionError),

    #[error("unknown resource type {0}")]
    UnknownResourceType(String),

    #[error("state returned by ReadResource is nil: {0}")]
    NullState(String),

    #[error("plugin client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

//! GCP API interaction module
//!
//! - [`auth`] - Token sources and default project/region discovery
//! - [`client`] - GCP client for making API requests
//! - [`http`] - HTTP utilities for REST API calls

pub mod auth;
pub mod client;
pub mod http;

pub use client::GcpClient;

//! Resource model
//!
//! Every enumerator, whatever the cloud, produces the same generic
//! [`Resource`]: a type tag, an identifier and an ordered attribute map.
//!
//! - [`deserializer`] - Turns typed provider state back into a [`Resource`]

pub mod deserializer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

pub use deserializer::Deserializer;

/// Ordered attribute map of a resource
pub type Attributes = Map<String, Value>;

/// Terraform-style resource type tag, e.g. `google_storage_bucket`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(ty: impl Into<String>) -> Self {
        Self(ty.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ResourceType> for ResourceType {
    fn from(value: &ResourceType) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ResourceType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ResourceType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ResourceType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A live cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(
        resource_type: impl Into<ResourceType>,
        id: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes,
        }
    }

    /// Resource with no attributes besides its identity
    pub fn stub(resource_type: impl Into<ResourceType>, id: impl Into<String>) -> Self {
        Self::new(resource_type, id, Attributes::new())
    }

    /// `(type, id)` pair identifying the resource within one scan
    pub fn identity(&self) -> (&str, &str) {
        (self.resource_type.as_str(), self.id.as_str())
    }

    /// String attribute lookup
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Extract short name from a GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a"
/// -> "us-central1-a"
pub fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

use super::{Attributes, Resource, ResourceType};
use crate::terraform::TypedValue;
use serde_json::Value;

/// Turns the typed state a plugin returned into generic [`Resource`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct Deserializer;

impl Deserializer {
    pub fn new() -> Self {
        Self
    }

    /// Deserialize one state value. A null state means the resource is gone
    /// and yields `None`.
    ///
    /// The id comes from the state's `id` attribute when it has one, else
    /// `fallback_id` is kept.
    pub fn deserialize_one(
        &self,
        resource_type: &ResourceType,
        fallback_id: &str,
        state: &TypedValue,
    ) -> Option<Resource> {
        if state.is_null() {
            return None;
        }

        let attributes = match state.to_json() {
            Value::Object(map) => map,
            other => {
                let mut map = Attributes::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let id = attributes
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(fallback_id)
            .to_string();

        Some(Resource::new(resource_type, id, attributes))
    }

    pub fn deserialize(
        &self,
        resource_type: &ResourceType,
        states: &[(String, TypedValue)],
    ) -> Vec<Resource> {
        states
            .iter()
            .filter_map(|(id, state)| self.deserialize_one(resource_type, id, state))
            .collect()
    }
}

//! Typed values
//!
//! A [`TypedValue`] is a value that has been checked against an [`AttrType`].
//! Values enter the typed world from three places: provider configuration
//! (JSON), flat attribute maps (`a.#`, `a.0`, `tags.%` style keys) and plugin
//! responses (msgpack, see [`super::msgpack`]).

use super::schema::AttrType;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Placeholder the legacy SDK writes for counts it does not know yet
pub const UNKNOWN_VARIABLE_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// Value did not conform to the expected type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl std::error::Error for ConversionError {}

impl ConversionError {
    pub(crate) fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

type Result<T> = std::result::Result<T, ConversionError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum TypedValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<TypedValue>),
    Set(Vec<TypedValue>),
    Map(BTreeMap<String, TypedValue>),
    Object(BTreeMap<String, TypedValue>),
    Tuple(Vec<TypedValue>),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attribute of an object value
    pub fn get_attr(&self, name: &str) -> Option<&TypedValue> {
        match self {
            Self::Object(attrs) => attrs.get(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value, checking it against `ty`
    pub fn from_json(value: &Value, ty: &AttrType) -> Result<Self> {
        convert_json(value, ty, "")
    }

    /// Convert a JSON value without a type, inferring one from the value
    pub fn from_untyped_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Tuple(items.iter().map(Self::from_untyped_json).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_untyped_json(v)))
                    .collect(),
            ),
        }
    }

    /// Build an object value from a flat attribute map
    pub fn from_flatmap(attrs: &HashMap<String, String>, ty: &AttrType) -> Result<Self> {
        let AttrType::Object(attr_types) = ty else {
            return Err(ConversionError::new(
                "",
                format!("flat attributes can only build an object, not a {}", ty.friendly_name()),
            ));
        };
        flatmap_object(attrs, "", attr_types)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) | Self::Set(items) | Self::Tuple(items) => {
                Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) | Self::Object(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

pub(crate) fn child_path(path: &str, attr: &str) -> String {
    if path.is_empty() {
        attr.to_string()
    } else {
        format!("{path}.{attr}")
    }
}

fn type_mismatch(path: &str, ty: &AttrType, value: &Value) -> ConversionError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ConversionError::new(path, format!("{} required, found {}", ty.friendly_name(), found))
}

pub(crate) fn parse_number(path: &str, raw: &str) -> Result<Number> {
    serde_json::from_str::<Number>(raw.trim())
        .map_err(|_| ConversionError::new(path, format!("a number is required, got {raw:?}")))
}

fn parse_bool(path: &str, raw: &str) -> Result<bool> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConversionError::new(path, format!("a bool is required, got {raw:?}"))),
    }
}

pub(crate) fn dedup(items: Vec<TypedValue>) -> Vec<TypedValue> {
    let mut unique: Vec<TypedValue> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn convert_json(value: &Value, ty: &AttrType, path: &str) -> Result<TypedValue> {
    if value.is_null() {
        return Ok(TypedValue::Null);
    }

    match ty {
        AttrType::Dynamic => Ok(TypedValue::from_untyped_json(value)),
        AttrType::String => match value {
            Value::String(s) => Ok(TypedValue::String(s.clone())),
            Value::Number(n) => Ok(TypedValue::String(n.to_string())),
            Value::Bool(b) => Ok(TypedValue::String(b.to_string())),
            _ => Err(type_mismatch(path, ty, value)),
        },
        AttrType::Number => match value {
            Value::Number(n) => Ok(TypedValue::Number(n.clone())),
            Value::String(s) => parse_number(path, s).map(TypedValue::Number),
            _ => Err(type_mismatch(path, ty, value)),
        },
        AttrType::Bool => match value {
            Value::Bool(b) => Ok(TypedValue::Bool(*b)),
            Value::String(s) => parse_bool(path, s).map(TypedValue::Bool),
            _ => Err(type_mismatch(path, ty, value)),
        },
        AttrType::List(elem) | AttrType::Set(elem) => {
            let Value::Array(items) = value else {
                return Err(type_mismatch(path, ty, value));
            };
            let converted = items
                .iter()
                .enumerate()
                .map(|(i, item)| convert_json(item, elem, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()?;
            if matches!(ty, AttrType::Set(_)) {
                Ok(TypedValue::Set(dedup(converted)))
            } else {
                Ok(TypedValue::List(converted))
            }
        }
        AttrType::Map(elem) => {
            let Value::Object(entries) = value else {
                return Err(type_mismatch(path, ty, value));
            };
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                map.insert(k.clone(), convert_json(v, elem, &format!("{path}[{k:?}]"))?);
            }
            Ok(TypedValue::Map(map))
        }
        AttrType::Object(attr_types) => {
            let Value::Object(entries) = value else {
                return Err(type_mismatch(path, ty, value));
            };
            if let Some(unknown) = entries.keys().find(|k| !attr_types.contains_key(*k)) {
                return Err(ConversionError::new(
                    &child_path(path, unknown),
                    "unsupported attribute",
                ));
            }
            let mut attrs = BTreeMap::new();
            for (name, attr_ty) in attr_types {
                let attr_value = entries.get(name).unwrap_or(&Value::Null);
                attrs.insert(
                    name.clone(),
                    convert_json(attr_value, attr_ty, &child_path(path, name))?,
                );
            }
            Ok(TypedValue::Object(attrs))
        }
        AttrType::Tuple(elem_types) => {
            let Value::Array(items) = value else {
                return Err(type_mismatch(path, ty, value));
            };
            if items.len() != elem_types.len() {
                return Err(ConversionError::new(
                    path,
                    format!(
                        "tuple of {} elements required, found {}",
                        elem_types.len(),
                        items.len()
                    ),
                ));
            }
            items
                .iter()
                .zip(elem_types)
                .enumerate()
                .map(|(i, (item, elem))| convert_json(item, elem, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(TypedValue::Tuple)
        }
    }
}

fn flat_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn flatmap_object(
    attrs: &HashMap<String, String>,
    prefix: &str,
    attr_types: &BTreeMap<String, AttrType>,
) -> Result<TypedValue> {
    let mut values = BTreeMap::new();
    for (name, ty) in attr_types {
        values.insert(name.clone(), flatmap_value(attrs, &flat_key(prefix, name), ty)?);
    }
    Ok(TypedValue::Object(values))
}

fn flatmap_value(attrs: &HashMap<String, String>, key: &str, ty: &AttrType) -> Result<TypedValue> {
    match ty {
        AttrType::String => Ok(attrs
            .get(key)
            .map(|raw| TypedValue::String(raw.clone()))
            .unwrap_or(TypedValue::Null)),
        AttrType::Number => match attrs.get(key) {
            Some(raw) if raw != UNKNOWN_VARIABLE_VALUE => {
                parse_number(key, raw).map(TypedValue::Number)
            }
            _ => Ok(TypedValue::Null),
        },
        AttrType::Bool => match attrs.get(key) {
            Some(raw) if raw != UNKNOWN_VARIABLE_VALUE => {
                parse_bool(key, raw).map(TypedValue::Bool)
            }
            _ => Ok(TypedValue::Null),
        },
        AttrType::Dynamic => Ok(match attrs.get(key) {
            Some(raw) => serde_json::from_str::<Value>(raw)
                .map(|v| TypedValue::from_untyped_json(&v))
                .unwrap_or_else(|_| TypedValue::String(raw.clone())),
            None => TypedValue::Null,
        }),
        AttrType::List(elem) => {
            let Some(count) = flatmap_count(attrs, key, "#")? else {
                return Ok(TypedValue::Null);
            };
            // A corrupt count must not outgrow the elements actually stored
            let present = child_segments(attrs, key, "#")
                .filter_map(|segment| segment.parse::<usize>().ok())
                .max()
                .map_or(0, |max| max + 1);
            (0..count.min(present))
                .map(|i| flatmap_value(attrs, &format!("{key}.{i}"), elem))
                .collect::<Result<Vec<_>>>()
                .map(TypedValue::List)
        }
        AttrType::Tuple(elem_types) => {
            let Some(count) = flatmap_count(attrs, key, "#")? else {
                return Ok(TypedValue::Null);
            };
            if count != elem_types.len() {
                return Err(ConversionError::new(
                    key,
                    format!("tuple of {} elements required, found {}", elem_types.len(), count),
                ));
            }
            elem_types
                .iter()
                .enumerate()
                .map(|(i, elem)| flatmap_value(attrs, &format!("{key}.{i}"), elem))
                .collect::<Result<Vec<_>>>()
                .map(TypedValue::Tuple)
        }
        AttrType::Set(elem) => {
            let Some(count) = flatmap_count(attrs, key, "#")? else {
                return Ok(TypedValue::Null);
            };
            if count == 0 {
                return Ok(TypedValue::Set(Vec::new()));
            }
            // Set elements are keyed by hash, not by position
            let indexes: BTreeSet<&str> = child_segments(attrs, key, "#").collect();
            indexes
                .into_iter()
                .map(|idx| flatmap_value(attrs, &format!("{key}.{idx}"), elem))
                .collect::<Result<Vec<_>>>()
                .map(|items| TypedValue::Set(dedup(items)))
        }
        AttrType::Map(elem) => {
            let Some(_) = flatmap_count(attrs, key, "%")? else {
                return Ok(TypedValue::Null);
            };
            let prefix = format!("{key}.");
            let mut entries = BTreeMap::new();
            if elem.is_primitive() || matches!(**elem, AttrType::Dynamic) {
                for (full_key, _) in attrs.iter().filter(|(k, _)| k.starts_with(&prefix)) {
                    let map_key = &full_key[prefix.len()..];
                    if map_key == "%" {
                        continue;
                    }
                    entries.insert(map_key.to_string(), flatmap_value(attrs, full_key, elem)?);
                }
            } else {
                let names: BTreeSet<&str> = child_segments(attrs, key, "%").collect();
                for name in names {
                    entries.insert(
                        name.to_string(),
                        flatmap_value(attrs, &format!("{key}.{name}"), elem)?,
                    );
                }
            }
            Ok(TypedValue::Map(entries))
        }
        AttrType::Object(attr_types) => {
            let prefix = format!("{key}.");
            if !attrs.keys().any(|k| k.starts_with(&prefix)) {
                return Ok(TypedValue::Null);
            }
            flatmap_object(attrs, key, attr_types)
        }
    }
}

/// Element count stored under `key.#` or `key.%`
fn flatmap_count(
    attrs: &HashMap<String, String>,
    key: &str,
    marker: &str,
) -> Result<Option<usize>> {
    let count_key = format!("{key}.{marker}");
    match attrs.get(&count_key).map(String::as_str) {
        None | Some("") | Some(UNKNOWN_VARIABLE_VALUE) => Ok(None),
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| {
                ConversionError::new(&count_key, format!("invalid element count {raw:?}"))
            }),
    }
}

/// First path segment of every key below `key`, skipping the count marker
fn child_segments<'a>(
    attrs: &'a HashMap<String, String>,
    key: &str,
    marker: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = format!("{key}.");
    attrs.keys().filter_map(move |k| {
        let rest = k.strip_prefix(&prefix)?;
        let segment = rest.split('.').next()?;
        (segment != marker).then_some(segment)
    })
}

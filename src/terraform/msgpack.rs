//! msgpack value encoding
//!
//! Plugins exchange configuration and state as msgpack documents shaped by
//! the attribute type. Objects and maps are msgpack maps, lists, sets and
//! tuples are arrays. A value whose type is `dynamic` carries its real type
//! along as a two element array `[type JSON, value]`. Unknown values use
//! extension type 0 and read back as null.

use super::schema::AttrType;
use super::value::{child_path, dedup, parse_number, ConversionError, TypedValue};
use rmpv::Value;
use serde_json::Number;
use std::collections::BTreeMap;

const UNKNOWN_EXT_TYPE: i8 = 0;

type Result<T> = std::result::Result<T, ConversionError>;

pub fn encode(value: &TypedValue, ty: &AttrType) -> Result<Vec<u8>> {
    let packed = to_msgpack(value, ty, "")?;
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &packed)
        .map_err(|e| ConversionError::new("", format!("msgpack encoding failed: {e}")))?;
    Ok(buf)
}

pub fn decode(raw: &[u8], ty: &AttrType) -> Result<TypedValue> {
    let mut reader = raw;
    let packed = rmpv::decode::read_value(&mut reader)
        .map_err(|e| ConversionError::new("", format!("invalid msgpack: {e}")))?;
    from_msgpack(&packed, ty, "")
}

/// Type a value has on its own, used when the schema says `dynamic`
pub fn implied_type(value: &TypedValue) -> AttrType {
    match value {
        TypedValue::Null => AttrType::Dynamic,
        TypedValue::Bool(_) => AttrType::Bool,
        TypedValue::Number(_) => AttrType::Number,
        TypedValue::String(_) => AttrType::String,
        TypedValue::List(items) => AttrType::list(element_type(items.iter())),
        TypedValue::Set(items) => AttrType::set(element_type(items.iter())),
        TypedValue::Map(entries) => AttrType::map(element_type(entries.values())),
        TypedValue::Object(attrs) => AttrType::Object(
            attrs
                .iter()
                .map(|(name, v)| (name.clone(), implied_type(v)))
                .collect(),
        ),
        TypedValue::Tuple(items) => AttrType::Tuple(items.iter().map(implied_type).collect()),
    }
}

fn element_type<'a>(mut items: impl Iterator<Item = &'a TypedValue>) -> AttrType {
    items
        .find(|v| !v.is_null())
        .map(implied_type)
        .unwrap_or(AttrType::Dynamic)
}

fn number_to_msgpack(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(i)
    } else if let Some(u) = n.as_u64() {
        Value::from(u)
    } else {
        n.as_f64().map_or(Value::Nil, Value::F64)
    }
}

fn to_msgpack(value: &TypedValue, ty: &AttrType, path: &str) -> Result<Value> {
    if matches!(ty, AttrType::Dynamic) {
        if value.is_null() {
            return Ok(Value::Nil);
        }
        let actual = implied_type(value);
        let type_json = serde_json::to_vec(&actual.to_cty_json())
            .map_err(|e| ConversionError::new(path, e.to_string()))?;
        return Ok(Value::Array(vec![
            Value::Binary(type_json),
            to_msgpack(value, &actual, path)?,
        ]));
    }

    match (ty, value) {
        (_, TypedValue::Null) => Ok(Value::Nil),
        (AttrType::String, TypedValue::String(s)) => Ok(Value::from(s.as_str())),
        (AttrType::Number, TypedValue::Number(n)) => Ok(number_to_msgpack(n)),
        (AttrType::Bool, TypedValue::Bool(b)) => Ok(Value::Boolean(*b)),
        (
            AttrType::List(elem) | AttrType::Set(elem),
            TypedValue::List(items) | TypedValue::Set(items) | TypedValue::Tuple(items),
        ) => items
            .iter()
            .enumerate()
            .map(|(i, item)| to_msgpack(item, elem, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (AttrType::Map(elem), TypedValue::Map(entries) | TypedValue::Object(entries)) => entries
            .iter()
            .map(|(k, v)| {
                Ok((
                    Value::from(k.as_str()),
                    to_msgpack(v, elem, &format!("{path}[{k:?}]"))?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Map),
        (AttrType::Object(attr_types), TypedValue::Object(attrs)) => {
            if let Some(unknown) = attrs.keys().find(|k| !attr_types.contains_key(*k)) {
                return Err(ConversionError::new(
                    &child_path(path, unknown),
                    "unsupported attribute",
                ));
            }
            attr_types
                .iter()
                .map(|(name, attr_ty)| {
                    let attr = attrs.get(name).unwrap_or(&TypedValue::Null);
                    Ok((
                        Value::from(name.as_str()),
                        to_msgpack(attr, attr_ty, &child_path(path, name))?,
                    ))
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Map)
        }
        (AttrType::Tuple(elem_types), TypedValue::Tuple(items) | TypedValue::List(items))
            if items.len() == elem_types.len() =>
        {
            items
                .iter()
                .zip(elem_types)
                .enumerate()
                .map(|(i, (item, elem))| to_msgpack(item, elem, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        _ => Err(ConversionError::new(
            path,
            format!("{} required", ty.friendly_name()),
        )),
    }
}

fn type_mismatch(path: &str, ty: &AttrType, raw: &Value) -> ConversionError {
    let found = match raw {
        Value::Nil => "null",
        Value::Boolean(_) => "bool",
        Value::Integer(_) | Value::F32(_) | Value::F64(_) => "number",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "extension",
    };
    ConversionError::new(path, format!("{} required, found {}", ty.friendly_name(), found))
}

fn float_value(path: &str, f: f64) -> Result<TypedValue> {
    Number::from_f64(f)
        .map(TypedValue::Number)
        .ok_or_else(|| ConversionError::new(path, format!("{f} is not a finite number")))
}

fn map_key<'a>(path: &str, key: &'a Value) -> Result<&'a str> {
    match key {
        Value::String(s) => s
            .as_str()
            .ok_or_else(|| ConversionError::new(path, "map key is not valid UTF-8")),
        other => Err(ConversionError::new(
            path,
            format!("map key must be a string, found {other}"),
        )),
    }
}

fn from_msgpack(raw: &Value, ty: &AttrType, path: &str) -> Result<TypedValue> {
    match raw {
        Value::Nil => return Ok(TypedValue::Null),
        Value::Ext(UNKNOWN_EXT_TYPE, _) => return Ok(TypedValue::Null),
        _ => {}
    }

    match ty {
        AttrType::Dynamic => {
            let Value::Array(pair) = raw else {
                return Err(type_mismatch(path, ty, raw));
            };
            let [type_json, inner] = pair.as_slice() else {
                return Err(ConversionError::new(
                    path,
                    "dynamic value must be a [type, value] pair",
                ));
            };
            let type_bytes = match type_json {
                Value::Binary(bytes) => bytes.as_slice(),
                Value::String(s) => s.as_bytes(),
                other => return Err(type_mismatch(path, &AttrType::String, other)),
            };
            let parsed: serde_json::Value = serde_json::from_slice(type_bytes)
                .map_err(|e| ConversionError::new(path, format!("invalid type: {e}")))?;
            let actual = AttrType::from_cty_json(&parsed)
                .map_err(|e| ConversionError::new(path, e.message))?;
            from_msgpack(inner, &actual, path)
        }
        AttrType::String => match raw {
            Value::String(s) => s
                .as_str()
                .map(|s| TypedValue::String(s.to_string()))
                .ok_or_else(|| ConversionError::new(path, "string is not valid UTF-8")),
            _ => Err(type_mismatch(path, ty, raw)),
        },
        AttrType::Number => match raw {
            Value::Integer(i) => i
                .as_i64()
                .map(Number::from)
                .or_else(|| i.as_u64().map(Number::from))
                .map(TypedValue::Number)
                .ok_or_else(|| ConversionError::new(path, format!("integer {i} out of range"))),
            Value::F32(f) => float_value(path, f64::from(*f)),
            Value::F64(f) => float_value(path, *f),
            // Numbers too large for a float travel as strings
            Value::String(s) => parse_number(path, s.as_str().unwrap_or_default())
                .map(TypedValue::Number),
            _ => Err(type_mismatch(path, ty, raw)),
        },
        AttrType::Bool => match raw {
            Value::Boolean(b) => Ok(TypedValue::Bool(*b)),
            _ => Err(type_mismatch(path, ty, raw)),
        },
        AttrType::List(elem) | AttrType::Set(elem) => {
            let Value::Array(items) = raw else {
                return Err(type_mismatch(path, ty, raw));
            };
            let converted = items
                .iter()
                .enumerate()
                .map(|(i, item)| from_msgpack(item, elem, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()?;
            if matches!(ty, AttrType::Set(_)) {
                Ok(TypedValue::Set(dedup(converted)))
            } else {
                Ok(TypedValue::List(converted))
            }
        }
        AttrType::Map(elem) => {
            let Value::Map(entries) = raw else {
                return Err(type_mismatch(path, ty, raw));
            };
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                let key = map_key(path, k)?;
                map.insert(
                    key.to_string(),
                    from_msgpack(v, elem, &format!("{path}[{key:?}]"))?,
                );
            }
            Ok(TypedValue::Map(map))
        }
        AttrType::Object(attr_types) => {
            let Value::Map(entries) = raw else {
                return Err(type_mismatch(path, ty, raw));
            };
            let mut attrs: BTreeMap<String, TypedValue> = attr_types
                .keys()
                .map(|name| (name.clone(), TypedValue::Null))
                .collect();
            for (k, v) in entries {
                let name = map_key(path, k)?;
                let Some(attr_ty) = attr_types.get(name) else {
                    return Err(ConversionError::new(
                        &child_path(path, name),
                        "unsupported attribute",
                    ));
                };
                attrs.insert(
                    name.to_string(),
                    from_msgpack(v, attr_ty, &child_path(path, name))?,
                );
            }
            Ok(TypedValue::Object(attrs))
        }
        AttrType::Tuple(elem_types) => {
            let Value::Array(items) = raw else {
                return Err(type_mismatch(path, ty, raw));
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
                .map(|(i, (item, elem))| from_msgpack(item, elem, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(TypedValue::Tuple)
        }
    }
}

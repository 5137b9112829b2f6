//! Provider schema
//!
//! Describes the attribute shape of the provider configuration and of every
//! resource type a plugin knows about. The schema is fetched once from the
//! plugin and is the only source of truth for typed conversions.
//!
//! Plugins describe attribute types with the cty JSON notation:
//! `"string"`, `["list", "string"]`, `["object", {"name": "string"}]`.

use super::value::ConversionError;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Attribute type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrType {
    String,
    Number,
    Bool,
    /// Any type, decided by the value itself
    Dynamic,
    List(Box<AttrType>),
    Set(Box<AttrType>),
    Map(Box<AttrType>),
    Object(BTreeMap<String, AttrType>),
    Tuple(Vec<AttrType>),
}

impl AttrType {
    pub fn list(elem: AttrType) -> Self {
        Self::List(Box::new(elem))
    }

    pub fn set(elem: AttrType) -> Self {
        Self::Set(Box::new(elem))
    }

    pub fn map(elem: AttrType) -> Self {
        Self::Map(Box::new(elem))
    }

    pub fn object<I, K>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, AttrType)>,
        K: Into<String>,
    {
        Self::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parse the cty JSON type notation
    pub fn from_cty_json(raw: &Value) -> Result<Self, ConversionError> {
        match raw {
            Value::String(name) => match name.as_str() {
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "bool" => Ok(Self::Bool),
                "dynamic" => Ok(Self::Dynamic),
                other => Err(ConversionError::new("", format!("unknown primitive type {other:?}"))),
            },
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(kind), elem] if kind == "list" => {
                    Ok(Self::list(Self::from_cty_json(elem)?))
                }
                [Value::String(kind), elem] if kind == "set" => {
                    Ok(Self::set(Self::from_cty_json(elem)?))
                }
                [Value::String(kind), elem] if kind == "map" => {
                    Ok(Self::map(Self::from_cty_json(elem)?))
                }
                // A third element lists optional attributes, which reads ignore
                [Value::String(kind), Value::Object(attrs), ..] if kind == "object" => attrs
                    .iter()
                    .map(|(name, ty)| Ok((name.clone(), Self::from_cty_json(ty)?)))
                    .collect::<Result<BTreeMap<_, _>, ConversionError>>()
                    .map(Self::Object),
                [Value::String(kind), Value::Array(elems)] if kind == "tuple" => elems
                    .iter()
                    .map(Self::from_cty_json)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Tuple),
                _ => Err(ConversionError::new("", format!("invalid cty type {raw}"))),
            },
            _ => Err(ConversionError::new("", format!("invalid cty type {raw}"))),
        }
    }

    pub fn to_cty_json(&self) -> Value {
        match self {
            Self::String => json!("string"),
            Self::Number => json!("number"),
            Self::Bool => json!("bool"),
            Self::Dynamic => json!("dynamic"),
            Self::List(elem) => json!(["list", elem.to_cty_json()]),
            Self::Set(elem) => json!(["set", elem.to_cty_json()]),
            Self::Map(elem) => json!(["map", elem.to_cty_json()]),
            Self::Object(attrs) => {
                let attrs: Map<String, Value> = attrs
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_cty_json()))
                    .collect();
                json!(["object", attrs])
            }
            Self::Tuple(elems) => {
                json!(["tuple", elems.iter().map(Self::to_cty_json).collect::<Vec<_>>()])
            }
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::String | Self::Number | Self::Bool)
    }

    /// Short name used in error messages
    pub fn friendly_name(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Number => "number".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Dynamic => "dynamic".to_string(),
            Self::List(elem) => format!("list of {}", elem.friendly_name()),
            Self::Set(elem) => format!("set of {}", elem.friendly_name()),
            Self::Map(elem) => format!("map of {}", elem.friendly_name()),
            Self::Object(_) => "object".to_string(),
            Self::Tuple(_) => "tuple".to_string(),
        }
    }
}

/// Single attribute of a block
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub ty: AttrType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
}

impl Attribute {
    pub fn new(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: true,
            computed: false,
            sensitive: false,
        }
    }
}

/// How a nested block repeats inside its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingMode {
    Single,
    Group,
    List,
    Set,
    Map,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedBlock {
    pub nesting: NestingMode,
    pub block: Block,
    pub min_items: u32,
    pub max_items: u32,
}

/// Configuration block: attributes plus nested blocks
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub attributes: BTreeMap<String, Attribute>,
    pub block_types: BTreeMap<String, NestedBlock>,
}

impl Block {
    /// Object type a value conforming to this block has
    pub fn implied_type(&self) -> AttrType {
        let mut attrs: BTreeMap<String, AttrType> = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.ty.clone()))
            .collect();

        for (name, nested) in &self.block_types {
            let inner = nested.block.implied_type();
            let ty = match nested.nesting {
                NestingMode::Single | NestingMode::Group => inner,
                NestingMode::List => AttrType::list(inner),
                NestingMode::Set => AttrType::set(inner),
                NestingMode::Map => AttrType::map(inner),
            };
            attrs.insert(name.clone(), ty);
        }

        AttrType::Object(attrs)
    }
}

/// Versioned block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub version: i64,
    pub block: Block,
}

/// Everything `get_schema` returns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resource_types: HashMap<String, Schema>,
}

impl ProviderSchema {
    pub fn resource(&self, ty: &str) -> Option<&Schema> {
        self.resource_types.get(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_block() -> Block {
        let mut block = Block::default();
        block
            .attributes
            .insert("id".to_string(), Attribute::new(AttrType::String));
        block
            .attributes
            .insert("labels".to_string(), Attribute::new(AttrType::map(AttrType::String)));

        let mut rule = Block::default();
        rule.attributes
            .insert("age".to_string(), Attribute::new(AttrType::Number));
        block.block_types.insert(
            "lifecycle_rule".to_string(),
            NestedBlock {
                nesting: NestingMode::List,
                block: rule,
                min_items: 0,
                max_items: 0,
            },
        );
        block
    }

    #[test]
    fn test_implied_type_includes_nested_blocks() {
        let ty = bucket_block().implied_type();
        let AttrType::Object(attrs) = ty else {
            panic!("implied type should be an object");
        };
        assert_eq!(attrs["id"], AttrType::String);
        assert_eq!(attrs["labels"], AttrType::map(AttrType::String));
        assert_eq!(
            attrs["lifecycle_rule"],
            AttrType::list(AttrType::object([("age", AttrType::Number)]))
        );
    }

    #[test]
    fn test_cty_json_types() {
        let raw = json!(["object", {
            "name": "string",
            "labels": ["map", "string"],
            "rules": ["list", ["object", {"age": "number"}]],
            "ports": ["set", "number"],
            "pair": ["tuple", ["bool", "dynamic"]]
        }]);
        let ty = AttrType::from_cty_json(&raw).unwrap();

        let AttrType::Object(attrs) = &ty else {
            panic!("should parse an object type");
        };
        assert_eq!(attrs["labels"], AttrType::map(AttrType::String));
        assert_eq!(
            attrs["rules"],
            AttrType::list(AttrType::object([("age", AttrType::Number)]))
        );
        assert_eq!(
            attrs["pair"],
            AttrType::Tuple(vec![AttrType::Bool, AttrType::Dynamic])
        );
        assert_eq!(AttrType::from_cty_json(&ty.to_cty_json()).unwrap(), ty);
    }

    #[test]
    fn test_cty_json_optional_attributes_are_accepted() {
        let raw = json!(["object", {"name": "string"}, ["name"]]);
        assert_eq!(
            AttrType::from_cty_json(&raw).unwrap(),
            AttrType::object([("name", AttrType::String)])
        );
    }

    #[test]
    fn test_cty_json_rejects_unknown_types() {
        assert!(AttrType::from_cty_json(&json!("capsule")).is_err());
        assert!(AttrType::from_cty_json(&json!(["list"])).is_err());
        assert!(AttrType::from_cty_json(&json!(42)).is_err());
    }
}

//! tfplugin5 wire messages
//!
//! The subset of the provider protocol the bridge calls: schema discovery,
//! provider configuration, resource reads and the go-plugin controller's
//! shutdown. Field numbers follow `tfplugin5.proto`; fields the bridge never
//! reads are left out and skipped by the decoder.

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DynamicValue {
    #[prost(bytes = "vec", tag = "1")]
    pub msgpack: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub json: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DiagnosticSeverity {
    Invalid = 0,
    Error = 1,
    Warning = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Diagnostic {
    #[prost(enumeration = "DiagnosticSeverity", tag = "1")]
    pub severity: i32,
    #[prost(string, tag = "2")]
    pub summary: String,
    #[prost(string, tag = "3")]
    pub detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Schema {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, optional, tag = "2")]
    pub block: Option<SchemaBlock>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SchemaBlock {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, repeated, tag = "2")]
    pub attributes: Vec<SchemaAttribute>,
    #[prost(message, repeated, tag = "3")]
    pub block_types: Vec<SchemaNestedBlock>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SchemaAttribute {
    #[prost(string, tag = "1")]
    pub name: String,
    /// cty type in its JSON notation
    #[prost(bytes = "vec", tag = "2")]
    pub r#type: Vec<u8>,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(bool, tag = "4")]
    pub required: bool,
    #[prost(bool, tag = "5")]
    pub optional: bool,
    #[prost(bool, tag = "6")]
    pub computed: bool,
    #[prost(bool, tag = "7")]
    pub sensitive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NestingMode {
    Invalid = 0,
    Single = 1,
    List = 2,
    Set = 3,
    Map = 4,
    Group = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SchemaNestedBlock {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(message, optional, tag = "2")]
    pub block: Option<SchemaBlock>,
    #[prost(enumeration = "NestingMode", tag = "3")]
    pub nesting: i32,
    #[prost(int64, tag = "4")]
    pub min_items: i64,
    #[prost(int64, tag = "5")]
    pub max_items: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetProviderSchemaRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProviderSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub provider: Option<Schema>,
    #[prost(map = "string, message", tag = "2")]
    pub resource_schemas: HashMap<String, Schema>,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureRequest {
    #[prost(string, tag = "1")]
    pub terraform_version: String,
    #[prost(message, optional, tag = "2")]
    pub config: Option<DynamicValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResourceRequest {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(message, optional, tag = "2")]
    pub current_state: Option<DynamicValue>,
    #[prost(bytes = "vec", tag = "3")]
    pub private: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub provider_meta: Option<DynamicValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResourceResponse {
    #[prost(message, optional, tag = "1")]
    pub new_state: Option<DynamicValue>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
    #[prost(bytes = "vec", tag = "3")]
    pub private: Vec<u8>,
}

/// Request and response of `plugin.GRPCController/Shutdown`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_diagnostic_decodes_from_wire() {
        let raw = [0x08, 0x01, 0x12, 0x04, b'b', b'o', b'o', b'm'];
        let diagnostic = Diagnostic::decode(&raw[..]).unwrap();

        assert_eq!(diagnostic.severity, DiagnosticSeverity::Error as i32);
        assert_eq!(diagnostic.summary, "boom");
        assert!(diagnostic.detail.is_empty());
    }

    #[test]
    fn test_read_request_field_numbers() {
        let request = ReadResourceRequest {
            type_name: "x".to_string(),
            current_state: Some(DynamicValue {
                msgpack: vec![0xc0],
                json: Vec::new(),
            }),
            private: Vec::new(),
            provider_meta: None,
        };

        assert_eq!(
            request.encode_to_vec(),
            vec![0x0a, 0x01, b'x', 0x12, 0x03, 0x0a, 0x01, 0xc0]
        );
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        // Attribute path (field 4) is not modelled
        let raw = [0x08, 0x02, 0x22, 0x02, 0x0a, 0x00, 0x1a, 0x01, b'd'];
        let diagnostic = Diagnostic::decode(&raw[..]).unwrap();
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Warning as i32);
        assert_eq!(diagnostic.detail, "d");
    }
}

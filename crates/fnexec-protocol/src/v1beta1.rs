//! `apiextensions.fn.proto.v1beta1` messages.
//!
//! The structs carry both the protobuf binary encoding (via `prost`) used on
//! the gRPC wire and the protobuf-JSON mapping (via `serde`) used on the
//! subprocess pipe. Field tags and JSON names follow the upstream `.proto`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::json;

/// Fully qualified protobuf package of this schema.
pub const PACKAGE: &str = "apiextensions.fn.proto.v1beta1";

// ============================================================================
// Requests
// ============================================================================

/// A request to run a function.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFunctionRequest {
    /// Metadata pertinent to the whole request.
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,

    /// The observed state prior to invocation of the function pipeline.
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<State>,

    /// Desired state accumulated by previous functions in the pipeline.
    #[prost(message, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<State>,

    /// Optional input specific to this function invocation.
    #[prost(message, optional, tag = "4")]
    #[serde(with = "json::structs", skip_serializing_if = "Option::is_none")]
    pub input: Option<::prost_types::Struct>,

    /// Context passed between functions in a pipeline.
    #[prost(message, optional, tag = "5")]
    #[serde(with = "json::structs", skip_serializing_if = "Option::is_none")]
    pub context: Option<::prost_types::Struct>,
}

/// Metadata pertinent to the whole request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMeta {
    /// Opaque string identifying the content of the request.
    #[prost(string, tag = "1")]
    #[serde(
        deserialize_with = "json::null_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub tag: String,
}

// ============================================================================
// Responses
// ============================================================================

/// The result of running a function.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFunctionResponse {
    /// Metadata pertinent to the whole response.
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,

    /// Desired state after this function has run.
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<State>,

    /// Results of the function run.
    #[prost(message, repeated, tag = "3")]
    #[serde(
        deserialize_with = "json::null_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub results: Vec<FunctionResult>,

    /// Context to pass to the next function in the pipeline.
    #[prost(message, optional, tag = "4")]
    #[serde(with = "json::structs", skip_serializing_if = "Option::is_none")]
    pub context: Option<::prost_types::Struct>,
}

/// Metadata pertinent to the whole response.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseMeta {
    /// Echo of the request tag.
    #[prost(string, tag = "1")]
    #[serde(
        deserialize_with = "json::null_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub tag: String,

    /// How long the response may be cached for.
    #[prost(message, optional, tag = "2")]
    #[serde(with = "json::duration", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<::prost_types::Duration>,
}

/// A single result reported by a function.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionResult {
    #[prost(enumeration = "Severity", tag = "1")]
    #[serde(
        serialize_with = "json::enums::serialize::<Severity, _>",
        deserialize_with = "json::enums::deserialize::<Severity, _>",
        skip_serializing_if = "json::is_zero"
    )]
    pub severity: i32,

    #[prost(string, tag = "2")]
    #[serde(
        deserialize_with = "json::null_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub message: String,
}

// ============================================================================
// Shared state
// ============================================================================

/// The state of the composite resource and its composed resources.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    /// The composite resource.
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<Resource>,

    /// Composed resources, keyed by resource name.
    #[prost(map = "string, message", tag = "2")]
    #[serde(
        deserialize_with = "json::null_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub resources: HashMap<String, Resource>,
}

/// A resource and its connection details.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    /// The resource manifest.
    #[prost(message, optional, tag = "1")]
    #[serde(with = "json::structs", skip_serializing_if = "Option::is_none")]
    pub resource: Option<::prost_types::Struct>,

    #[prost(map = "string, bytes", tag = "2")]
    #[serde(
        alias = "connection_details",
        with = "json::bytes_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub connection_details: HashMap<String, Vec<u8>>,

    #[prost(enumeration = "Ready", tag = "3")]
    #[serde(
        serialize_with = "json::enums::serialize::<Ready, _>",
        deserialize_with = "json::enums::deserialize::<Ready, _>",
        skip_serializing_if = "json::is_zero"
    )]
    pub ready: i32,
}

// ============================================================================
// Enums
// ============================================================================

/// Whether a composed resource is ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Ready {
    Unspecified = 0,
    True = 1,
    False = 2,
}

impl Ready {
    /// The protobuf name of the variant.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unspecified => "READY_UNSPECIFIED",
            Self::True => "READY_TRUE",
            Self::False => "READY_FALSE",
        }
    }

    /// Look a variant up by its protobuf name.
    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "READY_UNSPECIFIED" => Some(Self::Unspecified),
            "READY_TRUE" => Some(Self::True),
            "READY_FALSE" => Some(Self::False),
            _ => None,
        }
    }
}

/// Severity of a function result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Severity {
    Unspecified = 0,
    /// The function pipeline must stop.
    Fatal = 1,
    Warning = 2,
    Normal = 3,
}

impl Severity {
    /// The protobuf name of the variant.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unspecified => "SEVERITY_UNSPECIFIED",
            Self::Fatal => "SEVERITY_FATAL",
            Self::Warning => "SEVERITY_WARNING",
            Self::Normal => "SEVERITY_NORMAL",
        }
    }

    /// Look a variant up by its protobuf name.
    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "SEVERITY_UNSPECIFIED" => Some(Self::Unspecified),
            "SEVERITY_FATAL" => Some(Self::Fatal),
            "SEVERITY_WARNING" => Some(Self::Warning),
            "SEVERITY_NORMAL" => Some(Self::Normal),
            _ => None,
        }
    }
}

impl json::ProtoEnum for Ready {
    fn name_of(value: i32) -> Option<&'static str> {
        Self::try_from(value).ok().map(|v| v.as_str_name())
    }

    fn value_of(name: &str) -> Option<i32> {
        Self::from_str_name(name).map(|v| v as i32)
    }
}

impl json::ProtoEnum for Severity {
    fn name_of(value: i32) -> Option<&'static str> {
        Self::try_from(value).ok().map(|v| v.as_str_name())
    }

    fn value_of(name: &str) -> Option<i32> {
        Self::from_str_name(name).map(|v| v as i32)
    }
}

//! Payload codec shared by the gRPC wire and the subprocess pipe.
//!
//! The gRPC adapters always use protobuf binary. The subprocess pipe defaults
//! to protobuf-JSON and can be switched to binary, so a function sees the same
//! schema whichever way it is deployed.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bytes are not valid protobuf-JSON for the expected message.
    #[error("invalid protobuf-JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Bytes are not a valid protobuf encoding of the expected message.
    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Unrecognized format name.
    #[error("unknown payload format {0:?} (expected \"json\" or \"protobuf\")")]
    UnknownFormat(String),
}

/// A canonical byte serialization of the protocol messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Protobuf-JSON.
    #[default]
    Json,
    /// Protobuf binary, as used on the gRPC wire.
    Protobuf,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Protobuf => "protobuf",
        }
    }

    /// Serialize a message.
    pub fn encode<M>(&self, message: &M) -> Result<Vec<u8>, CodecError>
    where
        M: prost::Message + Serialize,
    {
        match self {
            Self::Json => Ok(serde_json::to_vec(message)?),
            Self::Protobuf => Ok(message.encode_to_vec()),
        }
    }

    /// Parse a message, failing on anything that does not conform to `M`.
    pub fn decode<M>(&self, bytes: &[u8]) -> Result<M, CodecError>
    where
        M: prost::Message + Default + DeserializeOwned,
    {
        match self {
            Self::Json => Ok(serde_json::from_slice(bytes)?),
            Self::Protobuf => Ok(M::decode(bytes)?),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "protobuf" | "proto" | "binary" => Ok(Self::Protobuf),
            _ => Err(CodecError::UnknownFormat(s.to_string())),
        }
    }
}

//! Function runner protocol.
//!
//! Shared between the `fnexec` server and anything that talks to it:
//! - `v1beta1`: the request/response schema
//! - `codec`: the byte encodings used on the subprocess pipe and the wire
//! - `service`: the `FunctionRunnerService` gRPC server and client
//! - `descriptor`: the schema's file descriptor, for gRPC reflection

pub mod codec;
pub mod descriptor;
pub mod json;
pub mod service;
pub mod v1beta1;

pub use codec::{Codec, CodecError};
pub use service::{FunctionRunnerService, FunctionRunnerServiceClient, FunctionRunnerServiceServer};
pub use v1beta1::*;

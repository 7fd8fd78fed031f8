//! gRPC adapters for `FunctionRunnerService`.
//!
//! Laid out the way `tonic` codegen lays out a service: a trait to implement,
//! a server wrapper that routes HTTP/2 requests to it, and a client.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::Body;
use tonic::codec::CompressionEncoding;

use crate::v1beta1::{RunFunctionRequest, RunFunctionResponse};

/// Fully qualified service name.
pub const SERVICE_NAME: &str = "apiextensions.fn.proto.v1beta1.FunctionRunnerService";

/// Path of the single `RunFunction` method.
pub const RUN_FUNCTION_PATH: &str =
    "/apiextensions.fn.proto.v1beta1.FunctionRunnerService/RunFunction";

type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;
type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// A service that runs composition functions.
#[async_trait::async_trait]
pub trait FunctionRunnerService: Send + Sync + 'static {
    /// Run a function with the supplied input.
    async fn run_function(
        &self,
        request: tonic::Request<RunFunctionRequest>,
    ) -> Result<tonic::Response<RunFunctionResponse>, tonic::Status>;
}

// ============================================================================
// Server
// ============================================================================

/// Routes gRPC requests to a [`FunctionRunnerService`].
#[derive(Debug)]
pub struct FunctionRunnerServiceServer<T> {
    inner: Arc<T>,
    accept_compression: Option<CompressionEncoding>,
    send_compression: Option<CompressionEncoding>,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
}

impl<T> FunctionRunnerServiceServer<T> {
    pub fn new(inner: T) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<T>) -> Self {
        Self {
            inner,
            accept_compression: None,
            send_compression: None,
            max_decoding_message_size: None,
            max_encoding_message_size: None,
        }
    }

    /// Accept requests compressed with `encoding`.
    #[must_use]
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.accept_compression = Some(encoding);
        self
    }

    /// Compress responses with `encoding` when the client supports it.
    #[must_use]
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.send_compression = Some(encoding);
        self
    }

    /// Limit the size of a decoded request. Defaults to 4MiB.
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = Some(limit);
        self
    }

    /// Limit the size of an encoded response. Defaults to `usize::MAX`.
    #[must_use]
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = Some(limit);
        self
    }
}

impl<T> Clone for FunctionRunnerServiceServer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            accept_compression: self.accept_compression,
            send_compression: self.send_compression,
            max_decoding_message_size: self.max_decoding_message_size,
            max_encoding_message_size: self.max_encoding_message_size,
        }
    }
}

struct RunFunctionSvc<T>(Arc<T>);

impl<T: FunctionRunnerService> tonic::server::UnaryService<RunFunctionRequest> for RunFunctionSvc<T> {
    type Response = RunFunctionResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<RunFunctionRequest>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.run_function(request).await })
    }
}

impl<T, B> tower::Service<http::Request<B>> for FunctionRunnerServiceServer<T>
where
    T: FunctionRunnerService,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != RUN_FUNCTION_PATH {
            return Box::pin(async move { Ok(tonic::Status::unimplemented("").into_http()) });
        }

        let method = RunFunctionSvc(Arc::clone(&self.inner));
        let accept_compression = self.accept_compression;
        let send_compression = self.send_compression;
        let max_decoding_message_size = self.max_decoding_message_size;
        let max_encoding_message_size = self.max_encoding_message_size;
        Box::pin(async move {
            let codec = tonic_prost::ProstCodec::<RunFunctionResponse, RunFunctionRequest>::default();
            let mut grpc = tonic::server::Grpc::new(codec).apply_max_message_size_config(
                max_decoding_message_size,
                max_encoding_message_size,
            );
            if let Some(encoding) = accept_compression {
                grpc = grpc.accept_compressed(encoding);
            }
            if let Some(encoding) = send_compression {
                grpc = grpc.send_compressed(encoding);
            }
            Ok(grpc.unary(method, req).await)
        })
    }
}

impl<T> tonic::server::NamedService for FunctionRunnerServiceServer<T> {
    const NAME: &'static str = SERVICE_NAME;
}

// ============================================================================
// Client
// ============================================================================

/// Client for a remote `FunctionRunnerService`.
#[derive(Debug, Clone)]
pub struct FunctionRunnerServiceClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl FunctionRunnerServiceClient<tonic::transport::Channel> {
    /// Connect to the service at `dst`.
    pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<tonic::transport::Endpoint>,
        D::Error: Into<StdError>,
    {
        let channel = tonic::transport::Endpoint::new(dst)?.connect().await?;
        Ok(Self::new(channel))
    }
}

impl<T> FunctionRunnerServiceClient<T>
where
    T: tonic::client::GrpcService<tonic::body::Body>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner: tonic::client::Grpc::new(inner),
        }
    }

    /// Run a function with the supplied input.
    pub async fn run_function(
        &mut self,
        request: impl tonic::IntoRequest<RunFunctionRequest>,
    ) -> Result<tonic::Response<RunFunctionResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {}", e.into())))?;
        let codec = tonic_prost::ProstCodec::<RunFunctionRequest, RunFunctionResponse>::default();
        let path = http::uri::PathAndQuery::from_static(RUN_FUNCTION_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }
}

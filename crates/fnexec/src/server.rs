//! gRPC listener for the function runner.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fnexec_protocol::{
    FunctionRunnerService, FunctionRunnerServiceServer, RunFunctionRequest, RunFunctionResponse,
    descriptor,
};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::runner::Runner;
use crate::tls::load_mtls_config;

/// Kind of socket to listen on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// TCP, address is `host:port`.
    #[default]
    Tcp,
    /// Unix domain socket, address is a filesystem path.
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

/// Address a [`Listener`] is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A bound socket, ready to serve the function runner.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    pub async fn bind(network: Network, address: &str) -> Result<Self> {
        match network {
            Network::Tcp => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("binding to tcp address {address}"))?;
                Ok(Self::Tcp(listener))
            }
            Network::Unix => {
                let path = PathBuf::from(address);
                remove_stale_socket(&path)?;
                let listener = UnixListener::bind(&path)
                    .with_context(|| format!("binding to unix socket {}", path.display()))?;
                Ok(Self::Unix { listener, path })
            }
        }
    }

    pub fn local_addr(&self) -> Result<ListenAddr> {
        match self {
            Self::Tcp(listener) => Ok(ListenAddr::Tcp(
                listener.local_addr().context("reading tcp listener address")?,
            )),
            Self::Unix { path, .. } => Ok(ListenAddr::Unix(path.clone())),
        }
    }

    /// Serve `RunFunction` until `shutdown` is cancelled.
    ///
    /// Cancelling `shutdown` also cancels every in-flight run. With `tls`, only
    /// clients presenting a certificate signed by its CA are served. gRPC server
    /// reflection is served alongside, behind the same TLS settings.
    pub async fn serve(
        self,
        runner: Arc<Runner>,
        tls: Option<ServerTlsConfig>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_file_descriptor_set(descriptor::file_descriptor_set())
            .build_v1()
            .context("building reflection service")?;

        let mut builder = Server::builder();
        if let Some(tls) = tls {
            builder = builder.tls_config(tls).context("configuring TLS")?;
        }

        let service = RunnerService {
            runner,
            shutdown: shutdown.clone(),
        };
        let router = builder
            .add_service(FunctionRunnerServiceServer::new(service))
            .add_service(reflection);
        let signal = async move { shutdown.cancelled().await };

        match self {
            Self::Tcp(listener) => router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await
                .context("serving on tcp listener"),
            Self::Unix { listener, path } => {
                let served = router
                    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                    .await
                    .context("serving on unix socket");
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("Failed to remove socket {}: {e}", path.display());
                }
                served
            }
        }
    }
}

/// Remove a socket file left behind by a dead server.
///
/// A socket that still accepts connections belongs to a live server and is
/// never removed.
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {}
        _ => return Ok(()),
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => bail!("unix socket {} is already in use", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("removing stale socket {}", path.display()))
        }
        Err(e) => {
            Err(e).with_context(|| format!("checking whether {} is in use", path.display()))
        }
    }
}

impl Runner {
    /// Bind `address` and serve this runner until `shutdown` is cancelled.
    ///
    /// TLS material is read before binding, so a bad certificate directory
    /// fails startup without ever accepting a connection.
    pub async fn listen_and_serve(
        self: Arc<Self>,
        network: Network,
        address: &str,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let tls = self
            .tls_certs_dir()
            .map(load_mtls_config)
            .transpose()
            .context("loading TLS server certificates")?;

        let listener = Listener::bind(network, address).await?;
        info!(
            address = %listener.local_addr()?,
            tls = tls.is_some(),
            command = self.command(),
            "Listening for RunFunction requests"
        );
        listener.serve(self, tls, shutdown).await
    }
}

/// Adapts a [`Runner`] to the gRPC service trait.
struct RunnerService {
    runner: Arc<Runner>,
    shutdown: CancellationToken,
}

#[async_trait]
impl FunctionRunnerService for RunnerService {
    async fn run_function(
        &self,
        request: Request<RunFunctionRequest>,
    ) -> Result<Response<RunFunctionResponse>, Status> {
        let cancel = self.shutdown.child_token();
        let req = request.into_inner();
        let tag = req.meta.as_ref().map(|m| m.tag.as_str()).unwrap_or_default();

        match self.runner.execute(&cancel, &req).await {
            Ok(resp) => Ok(Response::new(resp)),
            Err(err) => {
                warn!(tag, exit_code = ?err.exit_code(), "RunFunction failed: {err}");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    #[test]
    fn test_network_display() {
        assert_eq!(Network::default(), Network::Tcp);
        assert_eq!(Network::Unix.to_string(), "unix");
    }

    #[tokio::test]
    async fn test_bind_ephemeral_tcp_port() {
        let listener = Listener::bind(Network::Tcp, "127.0.0.1:0").await.unwrap();
        match listener.local_addr().unwrap() {
            ListenAddr::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("unexpected address {other}"),
        }
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fn.sock");
        let address = path.to_str().unwrap();

        let first = Listener::bind(Network::Unix, address).await.unwrap();
        drop(first);
        assert!(path.exists());

        let second = Listener::bind(Network::Unix, address).await.unwrap();
        assert_eq!(second.local_addr().unwrap(), ListenAddr::Unix(path));
    }

    #[tokio::test]
    async fn test_bind_leaves_live_socket_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fn.sock");
        let address = path.to_str().unwrap();

        let first = Listener::bind(Network::Unix, address).await.unwrap();
        let err = Listener::bind(Network::Unix, address).await.unwrap_err();
        assert!(format!("{err:#}").contains("already in use"), "{err:#}");

        // The first server still owns the path and accepts connections.
        let Listener::Unix { listener, .. } = first else {
            panic!("expected a unix listener");
        };
        let _client = UnixStream::connect(&path).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), listener.accept())
            .await
            .expect("first listener stopped accepting")
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"keep me").unwrap();

        assert!(Listener::bind(Network::Unix, path.to_str().unwrap()).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}

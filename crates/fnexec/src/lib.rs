//! Run composition functions as subprocesses behind a gRPC API.
//!
//! Each `RunFunction` call spawns the configured executable, writes the
//! encoded request to its stdin and decodes its stdout as the response.
//!
//! Unix only: functions run in their own process group and the server can
//! listen on a unix domain socket.

#[cfg(not(unix))]
compile_error!("fnexec only supports unix targets");

pub mod config;
pub mod error;
pub mod process;
pub mod runner;
pub mod server;
pub mod tls;

pub use error::{RunError, RunResult};
pub use runner::Runner;
pub use server::{ListenAddr, Listener, Network};
pub use tls::load_mtls_config;

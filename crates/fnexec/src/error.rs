//! Function run error types.

use fnexec_protocol::CodecError;
use thiserror::Error;

/// Result type for function runs.
pub type RunResult<T> = Result<T, RunError>;

/// Errors that can occur while running a function.
///
/// Each run fails with exactly one of these. Captured output is kept on
/// [`RunError::Execution`] for local diagnostics only and is never part of the
/// `Display` text. RPC callers only see the fixed text of [`tonic::Status`].
#[derive(Debug, Error)]
pub enum RunError {
    /// The request could not be serialized for the function.
    #[error("cannot encode function input: {0}")]
    Encode(#[source] CodecError),

    /// The function process could not be started or its pipes opened.
    #[error("cannot start {command}: {source}")]
    Setup {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing input, reading output or waiting for exit failed.
    #[error("cannot communicate with {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before the function exited.
    #[error("function run was cancelled")]
    Cancelled,

    /// The function exited unsuccessfully.
    #[error("{command} exited unsuccessfully ({})", describe_exit(.code))]
    Execution {
        command: String,
        /// Exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// The function exited cleanly but its output is not a valid response.
    #[error("cannot decode function output: {0}")]
    Decode(#[source] CodecError),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl RunError {
    /// Exit code of the function, when it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { code, .. } => *code,
            _ => None,
        }
    }
}

/// Command names, exit codes and codec errors stay in the server log.
impl From<RunError> for tonic::Status {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Cancelled => tonic::Status::cancelled("function run was cancelled"),
            RunError::Encode(_) => tonic::Status::internal("cannot encode function input"),
            RunError::Setup { .. } => tonic::Status::internal("cannot start function"),
            RunError::Io { .. } | RunError::Execution { .. } => {
                tonic::Status::internal("function run failed")
            }
            RunError::Decode(_) => {
                tonic::Status::internal("function returned a malformed response")
            }
        }
    }
}

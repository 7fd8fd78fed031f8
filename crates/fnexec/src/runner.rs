//! The function runner.
//!
//! A [`Runner`] turns a `RunFunctionRequest` into one execution of the
//! configured function and its stdout back into a `RunFunctionResponse`.

use std::path::{Path, PathBuf};

use fnexec_protocol::{Codec, RunFunctionRequest, RunFunctionResponse};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RunError, RunResult};
use crate::process::{Captured, Invocation};

/// Runs a function executable once per request.
///
/// A runner is immutable once built and is shared by all concurrent calls.
#[derive(Debug)]
pub struct Runner {
    command: String,
    args: Vec<String>,
    codec: Codec,
    /// Concurrency limit and the semaphore enforcing it.
    admission: Option<(usize, Semaphore)>,
    tls_certs_dir: Option<PathBuf>,
}

impl Runner {
    /// Create a runner for `command`, passing `args` on every run.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            codec: Codec::default(),
            admission: None,
            tls_certs_dir: None,
        }
    }

    /// Payload format used on the function's stdin and stdout.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Limit how many functions may run at once. Further calls wait for a slot.
    ///
    /// Zero is treated as no limit.
    pub fn with_max_concurrent_runs(mut self, limit: usize) -> Self {
        self.admission = (limit > 0).then(|| (limit, Semaphore::new(limit)));
        self
    }

    /// Serve with mutual TLS using `ca.crt`, `tls.crt` and `tls.key` from `dir`.
    pub fn with_tls_certs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tls_certs_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn max_concurrent_runs(&self) -> Option<usize> {
        self.admission.as_ref().map(|(limit, _)| *limit)
    }

    pub fn tls_certs_dir(&self) -> Option<&Path> {
        self.tls_certs_dir.as_deref()
    }

    /// Run the function with `req` as its input.
    ///
    /// Fails with exactly one [`RunError`]. If `cancel` fires while waiting for
    /// a slot or while the function runs, the function is killed and the call
    /// fails with [`RunError::Cancelled`].
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        req: &RunFunctionRequest,
    ) -> RunResult<RunFunctionResponse> {
        debug!(command = %self.command, args = ?self.args, "Running function");

        let input = self.codec.encode(req).map_err(RunError::Encode)?;

        let _permit = match &self.admission {
            Some((_, admission)) => Some(tokio::select! {
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                permit = admission.acquire() => permit.map_err(|_| RunError::Cancelled)?,
            }),
            None => None,
        };

        let result = Invocation {
            command: &self.command,
            args: &self.args,
            input,
        }
        .run(cancel)
        .await;
        self.log_outcome(&result);

        let Captured { stdout, .. } = result?;
        self.codec.decode(&stdout).map_err(RunError::Decode)
    }

    fn log_outcome(&self, result: &RunResult<Captured>) {
        match result {
            Ok(captured) => debug!(
                command = %self.command,
                args = ?self.args,
                stdout = %String::from_utf8_lossy(&captured.stdout),
                stderr = %String::from_utf8_lossy(&captured.stderr),
                exit_code = 0,
                "Ran function"
            ),
            Err(RunError::Execution {
                code,
                stdout,
                stderr,
                ..
            }) => debug!(
                command = %self.command,
                args = ?self.args,
                stdout = %String::from_utf8_lossy(stdout),
                stderr = %String::from_utf8_lossy(stderr),
                exit_code = ?code,
                "Function exited unsuccessfully"
            ),
            Err(e) => debug!(
                command = %self.command,
                args = ?self.args,
                error = %e,
                "Function run failed"
            ),
        }
    }
}

//! Subprocess execution for function runs.
//!
//! A function is any executable that reads an encoded request on stdin,
//! writes an encoded response on stdout and exits zero on success. Anything it
//! writes to stderr is captured for logging only.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RunError, RunResult};

/// How long to wait for a killed function to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// A single execution of a function.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    /// Encoded request, written to the function's stdin.
    pub input: Vec<u8>,
}

/// Output of a function that exited successfully.
#[derive(Debug, Default)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Invocation<'_> {
    /// Run the function to completion.
    ///
    /// stdout and stderr are drained concurrently with writing stdin, and both
    /// reach EOF before the exit status is awaited. If `cancel` fires first the
    /// function's process group is killed and reaped. If the returned future is
    /// dropped early the process group is killed as well.
    pub async fn run(self, cancel: &CancellationToken) -> RunResult<Captured> {
        let Invocation {
            command,
            args,
            input,
        } = self;

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let setup_error = |source: io::Error| RunError::Setup {
            command: command.to_string(),
            source,
        };
        let io_error = |source: io::Error| RunError::Io {
            command: command.to_string(),
            source,
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so cancellation also reaches anything it forks.
        cmd.process_group(0);

        let child = cmd.spawn().map_err(setup_error)?;
        let mut guard = ChildGuard::new(child);
        debug!(command, pid = ?guard.child_mut().id(), "Spawned function");

        let child = guard.child_mut();
        let stdin = child.stdin.take().ok_or_else(|| setup_error(missing_pipe("stdin")))?;
        let stdout = child.stdout.take().ok_or_else(|| setup_error(missing_pipe("stdout")))?;
        let stderr = child.stderr.take().ok_or_else(|| setup_error(missing_pipe("stderr")))?;

        let streams = tokio::select! {
            _ = cancel.cancelled() => {
                guard.terminate().await;
                return Err(RunError::Cancelled);
            }
            streams = exchange(stdin, input, stdout, stderr) => streams,
        };
        let (stdout, stderr) = streams.map_err(io_error)?;

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                guard.terminate().await;
                return Err(RunError::Cancelled);
            }
            status = guard.child_mut().wait() => status,
        };
        let status = status.map_err(io_error)?;
        guard.disarm();

        if !status.success() {
            return Err(RunError::Execution {
                command: command.to_string(),
                code: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(Captured { stdout, stderr })
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("function {name} was not captured"))
}

/// Feed `input` to the function while draining both of its output streams.
///
/// All three run to completion even if one of them fails.
async fn exchange(
    stdin: ChildStdin,
    input: Vec<u8>,
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let (fed, stdout, stderr) = tokio::join!(feed(stdin, input), drain(stdout), drain(stderr));
    fed?;
    Ok((stdout?, stderr?))
}

async fn feed(mut stdin: ChildStdin, input: Vec<u8>) -> io::Result<()> {
    // A function may exit without reading its input; its exit status decides.
    if let Err(e) = stdin.write_all(&input).await
        && e.kind() != io::ErrorKind::BrokenPipe
    {
        return Err(e);
    }
    // Dropping stdin closes it so the function sees EOF.
    drop(stdin);
    Ok(())
}

async fn drain(mut reader: impl AsyncRead + Unpin) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Owns a running function process.
///
/// Until disarmed, dropping the guard kills the whole process group. This
/// covers every early exit, including the RPC handler future being dropped
/// when a caller disconnects.
struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Kill the process group and wait for the function to be reaped.
    async fn terminate(&mut self) {
        let pid = self.child.id();
        kill_process_group(&self.child);
        if let Err(e) = self.child.start_kill() {
            debug!(?pid, "Function already exited before kill: {e}");
        }

        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?pid, %status, "Killed function"),
            Ok(Err(e)) => warn!(?pid, "Error waiting for killed function: {e}"),
            Err(_) => warn!(?pid, "Timeout waiting for killed function to exit"),
        }
        self.disarm();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        kill_process_group(&self.child);
        let _ = self.child.start_kill();
        let _ = self.child.try_wait();
    }
}

fn kill_process_group(child: &Child) {
    // `id()` is None once the child has been reaped, so a recycled pid is never hit.
    if let Some(pid) = child.id() {
        // SAFETY: killpg has no memory-safety preconditions.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

//! Running the external diff tool under a deadline.
//!
//! Every tool invocation goes through [`run_tool`]. The child's stdout and
//! stderr are drained on reader threads so a chatty child can never block on a
//! full pipe while we poll it, and the poll loop checks both the deadline and
//! the caller's [`CancelToken`]. A stopped child is killed and reaped before
//! [`ChangesetError::Cancelled`] is returned.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ChangesetError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A shared flag a caller can flip to stop in-flight tool runs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every run holding a clone of this token stops at
    /// its next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation applied to each tool invocation.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Per-invocation wall-clock limit. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation.
    pub cancel: CancelToken,
}

impl RunOptions {
    /// Options with a per-invocation deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: CancelToken::new(),
        }
    }
}

/// What a finished tool run produced.
#[derive(Debug)]
pub struct ToolOutput {
    /// Rendered command line, for error messages.
    pub command: String,
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Raw stdout.
    pub stdout: Vec<u8>,
    /// Stderr, lossily decoded and trimmed.
    pub stderr: String,
}

impl ToolOutput {
    /// Apply the diff exit convention: 0 means the inputs are identical, 1
    /// means they differ, anything else is a failed invocation.
    ///
    /// Returns `true` when the inputs differ.
    pub fn differs(&self) -> Result<bool, ChangesetError> {
        match self.exit_code {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(self.failure()),
        }
    }

    /// The run as a [`ChangesetError::ToolInvocation`].
    #[must_use]
    pub fn failure(&self) -> ChangesetError {
        ChangesetError::ToolInvocation {
            command: self.command.clone(),
            exit_code: self.exit_code,
            stderr: self.stderr.clone(),
        }
    }
}

/// Render a command line for diagnostics.
#[must_use]
pub fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` to completion, or until the deadline passes or `opts.cancel`
/// fires.
///
/// # Errors
/// - [`ChangesetError::ToolInvocation`] if the program cannot be started.
/// - [`ChangesetError::Cancelled`] if the run was stopped.
///
/// A non-zero exit is *not* an error here; callers decide what exit codes
/// mean.
pub fn run_tool(mut cmd: Command, opts: &RunOptions) -> Result<ToolOutput, ChangesetError> {
    let command = render(&cmd);
    let start = Instant::now();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ChangesetError::ToolInvocation {
            command: command.clone(),
            exit_code: None,
            stderr: format!("spawn failed: {e}"),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                let reason = if opts.cancel.is_cancelled() {
                    Some("cancelled by caller")
                } else if opts.timeout.is_some_and(|t| start.elapsed() >= t) {
                    Some("deadline exceeded")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    stop(&mut child, &command);
                    // Grandchildren may still hold the pipes open; the
                    // readers are detached rather than joined.
                    drop((stdout, stderr));
                    debug!(command = %command, reason, "tool run stopped");
                    return Err(ChangesetError::Cancelled { command, reason });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                stop(&mut child, &command);
                return Err(ChangesetError::ToolInvocation {
                    command,
                    exit_code: None,
                    stderr: format!("wait failed: {e}"),
                });
            }
        }
    };

    let stdout = join(stdout);
    let stderr = String::from_utf8_lossy(&join(stderr)).trim().to_owned();
    debug!(
        command = %command,
        exit_code = ?status.code(),
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "tool run finished"
    );

    Ok(ToolOutput {
        command,
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error truncates the capture; the exit status still decides.
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn stop(child: &mut Child, command: &str) {
    if let Err(e) = child.kill() {
        warn!(command, error = %e, "failed to kill tool process");
    }
    if let Err(e) = child.wait() {
        warn!(command, error = %e, "failed to reap tool process");
    }
}

//! Cancellable execution of external tools (`helm`, `git`)
//!
//! Each invocation is bounded by a timeout and a [`CancellationToken`]. The
//! child is spawned with `kill_on_drop`, so losing the race against either
//! one terminates the process instead of leaving it running.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Extra time granted on top of the tool's own `--timeout` before the
/// process is killed
const KILL_GRACE: Duration = Duration::from_secs(30);

/// Deadline and cancellation for one external call
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Time the tool is allowed to run
    pub timeout: Duration,
    /// Cancelled when the owning reconcile is abandoned
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Create a call context
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Same cancellation, different deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: self.cancel.clone(),
        }
    }
}

/// Why an external call did not produce output
#[derive(Debug)]
pub enum ProcessFailure {
    /// The executable could not be started or its pipes failed
    Spawn(String),
    /// The tool exited non-zero, with its stderr
    Exited(String),
    /// The deadline passed
    TimedOut(Duration),
    /// The call was cancelled
    Cancelled,
}

impl std::fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to run: {e}"),
            Self::Exited(stderr) => f.write_str(stderr),
            Self::TimedOut(t) => write!(f, "timed out after {}s", t.as_secs()),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Run `program` with `args`, feeding `stdin` if given, and return stdout.
pub async fn run<I, S>(
    program: &Path,
    args: I,
    stdin: Option<String>,
    ctx: &CallContext,
) -> Result<String, ProcessFailure>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program.display(), "Spawning external command");
    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessFailure::Spawn(e.to_string()))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| ProcessFailure::Spawn(format!("failed to write stdin: {e}")))?;
    }

    let deadline = ctx.timeout + KILL_GRACE;
    let output = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(ProcessFailure::Cancelled),
        res = tokio::time::timeout(deadline, child.wait_with_output()) => match res {
            Err(_) => return Err(ProcessFailure::TimedOut(deadline)),
            Ok(Err(e)) => return Err(ProcessFailure::Spawn(e.to_string())),
            Ok(Ok(output)) => output,
        },
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessFailure::Exited(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Format a duration the way helm expects `--timeout`
pub fn helm_duration(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

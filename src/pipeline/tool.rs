//! External program runner.
//!
//! Collaborators backed by a command-line tool (`pdftoppm`, `exiftool`) go
//! through [`run_tool`]. Children are spawned with `kill_on_drop(true)`:
//! when the orchestrator's timeout elapses and drops the future, the child
//! process is killed with it. `run_tool` also enforces its own deadline so
//! a tool used outside the orchestrator cannot block forever.

use crate::error::RedactError;
use crate::pipeline::state::Stage;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
}

/// Run `program` with `args`, optionally feeding `stdin`, with a hard timeout.
///
/// # Errors
/// - [`RedactError::ToolUnavailable`] — the program could not be started
/// - [`RedactError::ToolFailed`] — it exited non-zero or was killed by a signal
/// - [`RedactError::Timeout`] — it ran past `timeout` and was killed
pub async fn run_tool<I, S>(
    program: &str,
    args: I,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    stage: Stage,
) -> Result<ToolOutput, RedactError>
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

    debug!(tool = program, "spawning external tool");
    let mut child = cmd.spawn().map_err(|e| RedactError::ToolUnavailable {
        tool: program.to_string(),
        detail: e.to_string(),
    })?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(bytes), Some(mut pipe)) => Some(tokio::spawn(async move {
            // A tool that exits early closes the pipe; its exit status reports why.
            let _ = pipe.write_all(&bytes).await;
            let _ = pipe.shutdown().await;
        })),
        _ => None,
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| RedactError::ToolFailed {
            tool: program.to_string(),
            status: "io error".into(),
            stderr: e.to_string(),
        })?,
        Err(_) => {
            // `child` was moved into the dropped future; kill_on_drop reaps it.
            if let Some(f) = feeder {
                f.abort();
            }
            return Err(RedactError::Timeout {
                stage,
                secs: timeout.as_secs().max(1),
            });
        }
    };

    if let Some(f) = feeder {
        let _ = f.await;
    }

    if !output.status.success() {
        return Err(RedactError::ToolFailed {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(ToolOutput {
        stdout: output.stdout,
    })
}

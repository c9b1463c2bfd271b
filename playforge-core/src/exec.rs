//! Command Runner
//!
//! Runs a shell command with a wall-clock timeout and a capped output buffer.
//! The child is killed when the deadline passes or the cap is exceeded.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}ms", .after.as_millis())]
    TimedOut { command: String, after: Duration },

    #[error("`{command}` exited with code {code:?}: {stderr_tail}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("`{command}` produced more than {limit} bytes of output")]
    OutputLimitExceeded { command: String, limit: usize },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `command` through the platform shell inside `cwd`.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    deadline: Duration,
    max_output: usize,
) -> Result<CommandOutput, CommandError> {
    debug!(command, cwd = %cwd.display(), "Running command");

    #[cfg(target_os = "windows")]
    let mut cmd = Command::new("cmd");
    #[cfg(target_os = "windows")]
    cmd.arg("/C").arg(command);

    #[cfg(not(target_os = "windows"))]
    let mut cmd = Command::new("sh");
    #[cfg(not(target_os = "windows"))]
    cmd.arg("-c").arg(command);

    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let (out, err) = tokio::join!(read_capped(stdout, max_output), read_capped(stderr, max_output));
        let status = child.wait().await;
        (out, err, status)
    };

    let (out, err, status) = match timeout(deadline, run).await {
        Ok(result) => result,
        Err(_) => {
            return Err(CommandError::TimedOut {
                command: command.to_string(),
                after: deadline,
            })
        }
    };

    let (Some(stdout), Some(stderr)) = (out, err) else {
        return Err(CommandError::OutputLimitExceeded {
            command: command.to_string(),
            limit: max_output,
        });
    };

    let status = status.map_err(|source| CommandError::Wait {
        command: command.to_string(),
        source,
    })?;

    if !status.success() {
        return Err(CommandError::Failed {
            command: command.to_string(),
            code: status.code(),
            stderr_tail: tail(&stderr, STDERR_TAIL_BYTES),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Read a pipe to EOF. `None` once more than `limit` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> Option<Vec<u8>> {
    let Some(pipe) = pipe else {
        return Some(vec![]);
    };
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    match pipe.take(cap).read_to_end(&mut buf).await {
        Ok(_) if buf.len() <= limit => Some(buf),
        Ok(_) => None,
        Err(_) => Some(buf),
    }
}

fn tail(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    let start = trimmed.len().saturating_sub(max);
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(trimmed.len());
    trimmed[start..].to_string()
}
